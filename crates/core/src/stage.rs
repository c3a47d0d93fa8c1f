use serde::{Deserialize, Serialize};

/// One pipeline phase. Stages always execute in declaration order;
/// a stage's declared inputs are the previous stage's published outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingest,
    Clean,
    Model,
    Feature,
    Segment,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Ingest,
        Stage::Clean,
        Stage::Model,
        Stage::Feature,
        Stage::Segment,
    ];

    /// Stable directory name under the artifact root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Clean => "clean",
            Stage::Model => "model",
            Stage::Feature => "feature",
            Stage::Segment => "segment",
        }
    }

    /// Stage-identifying process exit code for a fatal stage failure.
    /// 20 = ingest, 21 = clean, ... 24 = segment.
    pub fn exit_code(&self) -> i32 {
        20 + Stage::ALL.iter().position(|s| s == self).unwrap() as i32
    }

    /// The stage that publishes this stage's inputs, if any.
    pub fn upstream(&self) -> Option<Stage> {
        match self {
            Stage::Ingest => None,
            Stage::Clean => Some(Stage::Ingest),
            Stage::Model => Some(Stage::Clean),
            Stage::Feature => Some(Stage::Model),
            Stage::Segment => Some(Stage::Feature),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingest" => Ok(Stage::Ingest),
            "clean" => Ok(Stage::Clean),
            "model" => Ok(Stage::Model),
            "feature" => Ok(Stage::Feature),
            "segment" => Ok(Stage::Segment),
            other => Err(format!(
                "unknown stage '{}': expected ingest|clean|model|feature|segment",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stage_identifying() {
        assert_eq!(Stage::Ingest.exit_code(), 20);
        assert_eq!(Stage::Segment.exit_code(), 24);
    }

    #[test]
    fn upstream_chain_is_sequential() {
        assert_eq!(Stage::Ingest.upstream(), None);
        assert_eq!(Stage::Clean.upstream(), Some(Stage::Ingest));
        assert_eq!(Stage::Segment.upstream(), Some(Stage::Feature));
    }

    #[test]
    fn stage_round_trips_through_str() {
        for stage in Stage::ALL {
            assert_eq!(stage.dir_name().parse::<Stage>().unwrap(), stage);
        }
        assert!("bronze".parse::<Stage>().is_err());
    }
}
