//! Device handles with enumeration-assigned identity.
//!
//! Serial numbers are not guaranteed globally unique across buses, so two
//! handles are equal iff they denote the same enumeration entry. Identity
//! is assigned from a process-wide counter on every enumeration pass;
//! handles from different passes never compare equal, even for the same
//! physical device.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::{EngineError, FlashEngine};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque per-enumeration identity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumerationId(u64);

/// One connected device as seen during a single enumeration pass.
///
/// Never mutated; superseded (not merged) by the next pass.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    id: EnumerationId,
    pub serial: String,
    pub product: String,
}

impl PartialEq for DeviceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DeviceHandle {}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.product.is_empty() {
            write!(f, "{}", self.serial)
        } else {
            write!(f, "{} ({})", self.serial, self.product)
        }
    }
}

impl DeviceHandle {
    pub fn id(&self) -> EnumerationId {
        self.id
    }
}

/// Run one enumeration pass against the engine, assigning fresh identities.
pub fn enumerate<E: FlashEngine>(
    engine: &E,
    max: usize,
) -> Result<Vec<DeviceHandle>, EngineError> {
    let raw = engine.enumerate(max)?;
    tracing::debug!(count = raw.len(), "Enumeration pass complete");
    Ok(raw
        .into_iter()
        .map(|d| DeviceHandle {
            id: EnumerationId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            serial: d.serial,
            product: d.product,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockEngine, RawDevice};

    #[test]
    fn test_identity_not_field_equality() {
        let engine = MockEngine::new();
        engine.set_devices(vec![RawDevice {
            serial: "SER123".into(),
            product: "edl".into(),
        }]);

        let pass1 = enumerate(&engine, 16).unwrap();
        let pass2 = enumerate(&engine, 16).unwrap();

        assert_eq!(pass1.len(), 1);
        assert_eq!(pass1[0].serial, pass2[0].serial);
        // Same fields, different enumeration entries.
        assert_ne!(pass1[0], pass2[0]);
        assert_eq!(pass1[0], pass1[0].clone());
    }
}
