use crate::block::Block;
use cogex_core::InterestArea;
use std::collections::HashSet;

/// A block tree that cannot be run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompositionError {
    #[error("{0} has no children")]
    Empty(String),
    #[error("loop {0} repeats zero times")]
    ZeroIterations(String),
    #[error("duplicate block label {0:?}")]
    DuplicateLabel(String),
    #[error("{block} cancels unknown block {target:?}")]
    UnknownTarget { block: String, target: String },
    #[error("{0}: timeout is shorter than min_rt")]
    TimeoutBeforeMinRt(String),
    #[error("{block}: {defect}")]
    Predicate { block: String, defect: &'static str },
    #[error("{block}: {option} does not apply to this kind of block")]
    Misapplied { block: String, option: &'static str },
}

/// A validated block tree, ready to be run by a session.
#[derive(Debug, Clone)]
pub struct Trial {
    label: String,
    root: Block,
    blocks: usize,
    areas: Vec<InterestArea>,
}

impl Trial {
    /// Assigns ids and labels, then validates the whole tree.
    pub fn new(label: impl Into<String>, mut root: Block) -> Result<Self, CompositionError> {
        let mut next = 0;
        root.assign_ids(&mut next);

        let mut all = Vec::new();
        collect(&root, &mut all);

        let mut names = HashSet::new();
        for block in &all {
            block.check()?;
            if !names.insert(block.label()) {
                return Err(CompositionError::DuplicateLabel(block.label().to_string()));
            }
        }
        for block in &all {
            if let Some(target) = block
                .cancel_targets()
                .into_iter()
                .find(|t| !names.contains(t))
            {
                return Err(CompositionError::UnknownTarget {
                    block: block.label().to_string(),
                    target: target.to_string(),
                });
            }
        }

        let mut areas: Vec<InterestArea> = Vec::new();
        for area in all.iter().flat_map(|b| b.interest_areas()) {
            if !areas.contains(area) {
                areas.push(area.clone());
            }
        }

        let blocks = all.len();
        Ok(Self {
            label: label.into(),
            blocks,
            areas,
            root,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn root(&self) -> &Block {
        &self.root
    }

    pub(crate) fn root_mut(&mut self) -> &mut Block {
        &mut self.root
    }

    pub fn block_count(&self) -> usize {
        self.blocks
    }

    /// Distinct interest areas used by gaze predicates, in tree order.
    pub fn interest_areas(&self) -> &[InterestArea] {
        &self.areas
    }
}

fn collect<'a>(block: &'a Block, out: &mut Vec<&'a Block>) {
    out.push(block);
    for child in block.children() {
        collect(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{Condition, Predicate};
    use cogex_core::Shape;
    use std::time::Duration;

    fn wait() -> Block {
        Block::wait(Duration::from_millis(10))
    }

    #[test]
    fn valid_tree_is_numbered() {
        let trial = Trial::new(
            "t",
            Block::sequence([wait(), Block::branch(Condition::Always, wait(), wait())]),
        )
        .unwrap();
        assert_eq!(trial.block_count(), 4);
        assert_eq!(trial.root().label(), "sequence#0");
    }

    #[test]
    fn empty_composites_are_rejected() {
        assert_eq!(
            Trial::new("t", Block::parallel([])).unwrap_err(),
            CompositionError::Empty("parallel#0".into())
        );
        assert_eq!(
            Trial::new("t", Block::repeat(0, wait())).unwrap_err(),
            CompositionError::ZeroIterations("loop#0".into())
        );
    }

    #[test]
    fn labels_must_be_unique() {
        let err = Trial::new(
            "t",
            Block::sequence([wait().labelled("isi"), wait().labelled("isi")]),
        )
        .unwrap_err();
        assert_eq!(err, CompositionError::DuplicateLabel("isi".into()));

        // An explicit label may not shadow a derived one either.
        let err = Trial::new("t", Block::sequence([wait(), wait().labelled("wait#1")]))
            .unwrap_err();
        assert_eq!(err, CompositionError::DuplicateLabel("wait#1".into()));
    }

    #[test]
    fn cancel_targets_must_exist() {
        let err = Trial::new(
            "t",
            Block::parallel([
                wait(),
                Block::input_wait(Predicate::AnyKey)
                    .cancels("stimulus")
                    .labelled("resp"),
            ]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            CompositionError::UnknownTarget {
                block: "resp".into(),
                target: "stimulus".into()
            }
        );
        assert!(Trial::new("t", Block::sequence([Block::cancel("nothing")])).is_err());
    }

    #[test]
    fn timeout_shorter_than_min_rt_is_rejected() {
        let err = Trial::new(
            "t",
            Block::input_wait(Predicate::AnyKey)
                .min_rt(Duration::from_millis(200))
                .timeout(Duration::from_millis(100)),
        )
        .unwrap_err();
        assert_eq!(err, CompositionError::TimeoutBeforeMinRt("input#0".into()));
    }

    #[test]
    fn interest_areas_are_collected_once() {
        let area = cogex_core::InterestArea::new(Shape::rect(0.0, 0.0, 10.0, 10.0), "left");
        let trial = Trial::new(
            "t",
            Block::sequence([
                Block::input_wait(Predicate::GazeIn(vec![area.clone()])),
                Block::input_wait(Predicate::fixation_in(
                    vec![area.clone()],
                    Duration::from_millis(100),
                )),
            ]),
        )
        .unwrap();
        assert_eq!(trial.interest_areas(), &[area]);
    }

    #[test]
    fn empty_area_list_is_rejected() {
        assert!(matches!(
            Trial::new("t", Block::input_wait(Predicate::GazeIn(Vec::new()))),
            Err(CompositionError::Predicate { .. })
        ));
    }
}
