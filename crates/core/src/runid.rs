//! Run identities -- `<timestamp>_#<suffix>` tokens and the lineage
//! rules that propagate them across stages.
//!
//! The suffix is the lineage key: once minted for an ingestion it is
//! never reused by an unrelated execution, and every downstream stage
//! carries it forward. Cleaning re-stamps the timestamp (many cleaning
//! attempts may follow one ingestion); modeling and everything after it
//! reuse the ingestion identity unchanged so all business marts for one
//! ingestion event group under a single identity.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::RunIdError;
use crate::stage::Stage;

/// A parsed run identity token, format `YYYYMMDD_HHMMSS_#<hex>`.
///
/// Ordering is lexicographic on (timestamp, suffix) -- never on
/// filesystem mtime -- so `latest` stays correct when runs complete
/// out of order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId {
    stamp: String,
    suffix: String,
}

impl RunId {
    /// Parse a run id string, validating the `<timestamp>_#<hex>` shape.
    ///
    /// The suffix must be 6..=32 lowercase hex characters (the shape the
    /// whole artifact layout is keyed on).
    pub fn parse(raw: &str) -> Result<RunId, RunIdError> {
        let malformed = || RunIdError::Malformed {
            raw: raw.to_string(),
        };

        let (stamp, suffix) = raw.split_once("_#").ok_or_else(malformed)?;

        let stamp_ok = stamp.len() == 15
            && stamp.as_bytes()[8] == b'_'
            && stamp[..8].bytes().all(|b| b.is_ascii_digit())
            && stamp[9..].bytes().all(|b| b.is_ascii_digit());
        if !stamp_ok {
            return Err(malformed());
        }

        let suffix_ok = (6..=32).contains(&suffix.len())
            && suffix
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !suffix_ok {
            return Err(malformed());
        }

        Ok(RunId {
            stamp: stamp.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// Mint a fresh identity: current timestamp plus a random 6-hex suffix.
    pub fn mint(now: OffsetDateTime, rng: &mut dyn RngCore) -> RunId {
        RunId {
            stamp: format_stamp(now),
            suffix: format!("{:06x}", rng.next_u32() & 0xff_ffff),
        }
    }

    /// Re-stamp this identity with a new timestamp, keeping the suffix.
    pub fn rebase(&self, now: OffsetDateTime) -> RunId {
        RunId {
            stamp: format_stamp(now),
            suffix: self.suffix.clone(),
        }
    }

    /// The timestamp component, `YYYYMMDD_HHMMSS`.
    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    /// The hex lineage suffix.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_#{}", self.stamp, self.suffix)
    }
}

impl Serialize for RunId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RunId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RunId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// One stage invocation's identity: created once, immutable thereafter,
/// referenced by every artifact the stage produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    pub id: RunId,
    pub stage: Stage,
    pub created_at: String,
}

/// Mint a stage identity according to the lineage rules.
///
/// - `Ingest`: no upstream; fresh timestamp, fresh random suffix.
/// - `Clean`: upstream is the ingest identity; new timestamp, suffix
///   copied verbatim.
/// - `Model` / `Feature` / `Segment`: upstream is the ingest identity;
///   reused unchanged (timestamp and suffix), grouping all marts for
///   one ingestion under one identity regardless of how many cleaning
///   attempts preceded them.
pub fn mint(
    stage: Stage,
    upstream: Option<&RunId>,
    now: OffsetDateTime,
    rng: &mut dyn RngCore,
) -> Result<RunIdentity, RunIdError> {
    let id = match (stage, upstream) {
        (Stage::Ingest, None) => RunId::mint(now, rng),
        (Stage::Ingest, Some(_)) => {
            return Err(RunIdError::UnexpectedUpstream {
                stage: stage.to_string(),
            })
        }
        (Stage::Clean, Some(up)) => up.rebase(now),
        (_, Some(up)) => up.clone(),
        (_, None) => {
            return Err(RunIdError::MissingUpstream {
                stage: stage.to_string(),
            })
        }
    };

    Ok(RunIdentity {
        id,
        stage,
        created_at: iso8601(now),
    })
}

fn format_stamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// Simple ISO 8601 UTC timestamp (no sub-second precision).
pub fn iso8601(now: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use time::macros::datetime;

    fn rng() -> StepRng {
        StepRng::new(0xabcdef, 1)
    }

    #[test]
    fn parse_accepts_canonical_shape() {
        let id = RunId::parse("20250114_093010_#a1b2c3").unwrap();
        assert_eq!(id.stamp(), "20250114_093010");
        assert_eq!(id.suffix(), "a1b2c3");
        assert_eq!(id.to_string(), "20250114_093010_#a1b2c3");
    }

    #[test]
    fn parse_rejects_malformed_shapes() {
        for raw in [
            "",
            "20250114_093010",
            "20250114093010_#a1b2c3",
            "20250114_093010_#XYZ123",
            "20250114_093010_#ab",
            "2025x114_093010_#a1b2c3",
        ] {
            assert!(
                matches!(RunId::parse(raw), Err(RunIdError::Malformed { .. })),
                "expected malformed: {:?}",
                raw
            );
        }
    }

    #[test]
    fn mint_ingest_is_fresh() {
        let now = datetime!(2025-01-14 09:30:10 UTC);
        let identity = mint(Stage::Ingest, None, now, &mut rng()).unwrap();
        assert_eq!(identity.id.stamp(), "20250114_093010");
        assert_eq!(identity.id.suffix().len(), 6);
        assert_eq!(identity.stage, Stage::Ingest);
        assert_eq!(identity.created_at, "2025-01-14T09:30:10Z");
    }

    #[test]
    fn clean_inherits_suffix_with_new_stamp() {
        let ingest = RunId::parse("20250114_093010_#a1b2c3").unwrap();
        let later = datetime!(2025-01-14 10:00:00 UTC);
        let clean = mint(Stage::Clean, Some(&ingest), later, &mut rng()).unwrap();
        assert_eq!(clean.id.suffix(), "a1b2c3");
        assert_eq!(clean.id.stamp(), "20250114_100000");
        assert_ne!(clean.id, ingest);
    }

    #[test]
    fn model_reuses_ingest_identity_unchanged() {
        let ingest = RunId::parse("20250114_093010_#a1b2c3").unwrap();
        let later = datetime!(2025-01-15 00:00:00 UTC);
        for stage in [Stage::Model, Stage::Feature, Stage::Segment] {
            let identity = mint(stage, Some(&ingest), later, &mut rng()).unwrap();
            assert_eq!(identity.id, ingest, "{} must reuse ingest id", stage);
        }
    }

    #[test]
    fn missing_upstream_is_an_error() {
        let now = datetime!(2025-01-14 09:30:10 UTC);
        for stage in [Stage::Clean, Stage::Model] {
            assert!(matches!(
                mint(stage, None, now, &mut rng()),
                Err(RunIdError::MissingUpstream { .. })
            ));
        }
    }

    #[test]
    fn ordering_follows_timestamp_then_suffix() {
        let a = RunId::parse("20250114_093010_#ffffff").unwrap();
        let b = RunId::parse("20250114_093011_#000000").unwrap();
        assert!(a < b);
    }
}
