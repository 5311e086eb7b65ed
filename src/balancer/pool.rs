use std::sync::atomic::{AtomicUsize, Ordering};

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub(crate) id: String,
    pub(crate) url: Url,
}

/// Backend endpoints of one pool in rotation order.
#[derive(Debug, Default)]
pub(crate) struct Pool {
    endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
}

impl Pool {
    /// Inserts a new endpoint at the end of the rotation, or updates the URL of an
    /// existing one in place.
    pub(crate) fn upsert(&mut self, id: &str, url: Url) {
        match self.endpoints.iter_mut().find(|endpoint| endpoint.id == id) {
            Some(endpoint) => endpoint.url = url,
            None => self.endpoints.push(Endpoint {
                id: id.to_string(),
                url,
            }),
        }
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Endpoint> {
        let index = self.endpoints.iter().position(|endpoint| endpoint.id == id)?;
        Some(self.endpoints.remove(index))
    }

    /// Next endpoint in round-robin order. Safe to call through a shared reference from
    /// many requests at once.
    pub(crate) fn next(&self) -> Option<&Endpoint> {
        if self.endpoints.is_empty() {
            return None;
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        self.endpoints.get(index)
    }

    pub(crate) fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn url(port: u16) -> Url {
        Url::parse(&format!("http://10.0.0.1:{port}")).unwrap()
    }

    #[test]
    fn rotation_visits_every_endpoint() {
        let mut pool = Pool::default();
        for port in 8080..8083 {
            pool.upsert(&format!("h{port}"), url(port));
        }

        let seen: HashSet<_> = (0..3)
            .map(|_| pool.next().unwrap().id.clone())
            .collect();

        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn update_keeps_rotation_slot() {
        let mut pool = Pool::default();
        pool.upsert("h1", url(1));
        pool.upsert("h2", url(2));
        pool.upsert("h1", url(3));

        assert_eq!(pool.endpoints()[0].id, "h1");
        assert_eq!(pool.endpoints()[0].url, url(3));
        assert_eq!(pool.endpoints().len(), 2);
    }

    #[test]
    fn empty_pool_has_no_next() {
        let mut pool = Pool::default();
        pool.upsert("h1", url(1));

        assert!(pool.remove("h1").is_some());
        assert!(pool.remove("h1").is_none());
        assert!(pool.endpoints().is_empty());
        assert!(pool.next().is_none());
    }
}
