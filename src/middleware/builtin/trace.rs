//! Request log middleware. Appends one JSON line per request to a file.

use std::{
    collections::HashMap,
    fs::OpenOptions,
    io,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Instant,
};

use futures::future::{BoxFuture, FutureExt};
use http::{header, Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{fs::File, io::AsyncWriteExt, sync::Mutex};
use tracing::warn;

use crate::{
    handler::{Handler, ProxyBody, SharedHandler},
    middleware::{registry::decode_options, MiddlewareError},
};

pub(crate) const NAME: &str = "trace";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct TraceOptions {
    output: String,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            output: "/dev/stdout".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TraceRecord<'a> {
    method: &'a str,
    uri: String,
    host: &'a str,
    status: u16,
    duration_us: u128,
}

struct Trace {
    next: SharedHandler,
    output: Arc<Mutex<File>>,
}

/// Output files by path, opened once and shared by every chain built from one registration.
#[derive(Default)]
struct Outputs {
    files: StdMutex<HashMap<String, Arc<Mutex<File>>>>,
}

impl Outputs {
    fn open(&self, path: &str) -> io::Result<Arc<Mutex<File>>> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = files.get(path) {
            return Ok(file.clone());
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let file = Arc::new(Mutex::new(File::from_std(file)));
        files.insert(path.to_string(), file.clone());

        Ok(file)
    }
}

pub(crate) fn constructor(
) -> impl Fn(SharedHandler, &Value) -> Result<SharedHandler, MiddlewareError> + Send + Sync + 'static
{
    let outputs = Outputs::default();
    move |next, opts| construct(&outputs, next, opts)
}

fn construct(
    outputs: &Outputs,
    next: SharedHandler,
    opts: &Value,
) -> Result<SharedHandler, MiddlewareError> {
    let options: TraceOptions = decode_options(NAME, opts)?;
    let output = outputs.open(&options.output)?;

    Ok(Arc::new(Trace { next, output }))
}

impl Handler for Trace {
    fn handle(&self, req: Request<ProxyBody>) -> BoxFuture<'static, Response<ProxyBody>> {
        let next = self.next.clone();
        let output = self.output.clone();

        async move {
            let started = Instant::now();
            let method = req.method().clone();
            let uri = req.uri().to_string();
            let host = req
                .headers()
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();

            let response = next.handle(req).await;

            let record = TraceRecord {
                method: method.as_str(),
                uri,
                host: &host,
                status: response.status().as_u16(),
                duration_us: started.elapsed().as_micros(),
            };

            if let Err(err) = write_record(&output, &record).await {
                warn!(%err, "Failed to write trace record");
            }

            response
        }
        .boxed()
    }
}

async fn write_record(output: &Mutex<File>, record: &TraceRecord<'_>) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    let mut file = output.lock().await;
    file.write_all(&line).await?;
    file.flush().await
}
