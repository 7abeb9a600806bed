//! Request fingerprints.
//!
//! A fingerprint is a stable hash over everything that determines a
//! derivative's bytes: the identifier, the normalized operation list, and
//! the pixel-affecting configuration subset. Equal fingerprints mean the
//! cache may serve either build's output for the other.

use std::fmt;

use tessera_core::Config;

use crate::OperationList;

/// A 256-bit request fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Computes the fingerprint of a request.
    pub fn compute(identifier: &str, ops: &OperationList, config: &Config) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(identifier.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(ops.canonical().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(config_subset(config).as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Hex rendering, usable as a file name.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Raw digest bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The configuration keys that change output pixels for the same
/// operation list.
fn config_subset(config: &Config) -> String {
    format!(
        "limit8={};normalize={};preserve={}",
        config.processor.limit_to_8_bits,
        config.processor.normalize,
        config.processor.metadata_preserve,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Crop, Encode, Operation, Scale};
    use tessera_core::{Format, Rect};

    fn ops(raw: Vec<Operation>) -> OperationList {
        OperationList::new(raw).expect("normalize")
    }

    #[test]
    fn equal_after_normalization() {
        let config = Config::default();
        let a = ops(vec![
            Operation::Scale(Scale::FitWidth(256)),
            Operation::Crop(Crop::Pixels(Rect::new(0, 0, 512, 512))),
            Operation::Encode(Encode::new(Format::Jpeg)),
        ]);
        let b = ops(vec![
            Operation::Crop(Crop::Pixels(Rect::new(0, 0, 512, 512))),
            Operation::Scale(Scale::FitWidth(256)),
            Operation::Rotate(0.0),
            Operation::Encode(Encode::new(Format::Jpeg)),
        ]);

        assert_eq!(
            Fingerprint::compute("a/b", &a, &config),
            Fingerprint::compute("a/b", &b, &config)
        );
    }

    #[test]
    fn sensitive_to_every_input() {
        let config = Config::default();
        let base = ops(vec![Operation::Encode(Encode::new(Format::Png))]);
        let fp = Fingerprint::compute("x", &base, &config);

        // Identifier
        assert_ne!(fp, Fingerprint::compute("y", &base, &config));

        // Operation list
        let scaled = ops(vec![
            Operation::Scale(Scale::Percent(0.5)),
            Operation::Encode(Encode::new(Format::Png)),
        ]);
        assert_ne!(fp, Fingerprint::compute("x", &scaled, &config));

        // Config subset
        let mut other = Config::default();
        other.processor.normalize = true;
        assert_ne!(fp, Fingerprint::compute("x", &base, &other));
    }

    #[test]
    fn irrelevant_config_is_ignored() {
        let base = ops(vec![Operation::Encode(Encode::new(Format::Png))]);
        let a = Config::default();
        let mut b = Config::default();
        b.timeouts.read_seconds = 5;
        b.cache.derivative.ttl_seconds = 10;

        assert_eq!(
            Fingerprint::compute("x", &base, &a),
            Fingerprint::compute("x", &base, &b)
        );
    }

    #[test]
    fn hex_shape() {
        let base = ops(vec![Operation::Encode(Encode::new(Format::Png))]);
        let hex = Fingerprint::compute("x", &base, &Config::default()).to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
