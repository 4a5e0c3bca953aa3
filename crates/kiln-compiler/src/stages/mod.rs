//! Architecture-neutral stages
//!
//! [`standard_stages`] lists every stage of the default pipeline, the x86
//! ones included; [`default_pipeline`] orders them.

pub mod blocks;
pub mod canonicalize;
pub mod decode;
pub mod dominance;
pub mod ssa;

pub use blocks::BlockDiscoveryStage;
pub use canonicalize::CanonicalizeStage;
pub use decode::{DecodeStage, DecodeSummary};
pub use dominance::{DominanceInfo, DominanceStage};
pub use ssa::{EnterSsaStage, LeaveSsaStage, SsaSummary};

use crate::pipeline::{Pipeline, PipelineError, Stage};
use crate::x86::{EmitStage, LoweringStage};

/// Stages of the default pipeline in declaration order
pub fn standard_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(DecodeStage),
        Box::new(BlockDiscoveryStage),
        Box::new(CanonicalizeStage),
        Box::new(DominanceStage),
        Box::new(EnterSsaStage),
        Box::new(LeaveSsaStage),
        Box::new(LoweringStage),
        Box::new(EmitStage),
    ]
}

pub fn default_pipeline() -> Result<Pipeline, PipelineError> {
    Pipeline::new(standard_stages())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let pipeline = default_pipeline().unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "decode",
                "block-discovery",
                "canonicalize",
                "dominance",
                "enter-ssa",
                "leave-ssa",
                "lowering",
                "emit"
            ]
        );
    }

    #[test]
    fn test_order_does_not_depend_on_declaration() {
        let mut stages = standard_stages();
        stages.reverse();
        let pipeline = Pipeline::new(stages).unwrap();
        let names = pipeline.stage_names();
        let position = |name| names.iter().position(|n| *n == name).unwrap();
        assert!(position("decode") < position("block-discovery"));
        assert!(position("canonicalize") < position("enter-ssa"));
        assert!(position("dominance") < position("enter-ssa"));
        assert!(position("leave-ssa") < position("lowering"));
        assert_eq!(names.last(), Some(&"emit"));
    }
}
