pub(crate) mod trace;

use super::Registry;

/// Registers every middleware shipped with the binary.
pub(crate) fn register_all(registry: &mut Registry) {
    registry.register(trace::NAME, trace::constructor());
}
