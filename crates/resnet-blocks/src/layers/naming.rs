//! # Layer Naming
//!
//! Residual block layers are named from their stage and block labels:
//!
//! ```text
//! res{stage}{block}_branch{suffix}   // convolutions
//! bn{stage}{block}_branch{suffix}    // batch norms
//! ```
//!
//! where `suffix` is `2a`, `2b`, `2c` on the main path and `1` on the
//! projection shortcut. The names match the published `ResNet` weight files,
//! and [`LayerNameRegistry`] rejects collisions when blocks are assembled.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A branch position within a residual block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branch {
    /// First 1x1 conv of the main path.
    Main2a,

    /// Middle ``k x k`` conv of the main path.
    Main2b,

    /// Last 1x1 conv of the main path.
    Main2c,

    /// 1x1 projection on the shortcut path.
    Shortcut,
}

impl Branch {
    /// The name suffix for this branch.
    pub fn suffix(&self) -> &'static str {
        match self {
            Branch::Main2a => "2a",
            Branch::Main2b => "2b",
            Branch::Main2c => "2c",
            Branch::Shortcut => "1",
        }
    }
}

/// The `(stage, block)` position of a residual block in a network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockName {
    /// Stage label; `2..=5` in the standard `ResNet` layout.
    pub stage: usize,

    /// Block label within the stage; `a`, `b`, ...
    pub block: String,
}

impl BlockName {
    /// Create a new block name.
    pub fn new<S: Into<String>>(
        stage: usize,
        block: S,
    ) -> Self {
        Self {
            stage,
            block: block.into(),
        }
    }

    /// The conv layer name for a branch.
    pub fn conv_name(
        &self,
        branch: Branch,
    ) -> String {
        format!("res{self}_branch{}", branch.suffix())
    }

    /// The norm layer name for a branch.
    pub fn norm_name(
        &self,
        branch: Branch,
    ) -> String {
        format!("bn{self}_branch{}", branch.suffix())
    }

    /// The conv and norm names for a branch.
    pub fn label(
        &self,
        branch: Branch,
    ) -> LayerLabel {
        LayerLabel::new(self.conv_name(branch), self.norm_name(branch))
    }
}

impl fmt::Display for BlockName {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}{}", self.stage, self.block)
    }
}

/// Block labels within a stage.
///
/// Stages of up to 6 blocks use `a`, `b`, ... `f`; longer stages use
/// `a`, `b1`, `b2`, ... as in the `ResNet-101/152` weight releases.
///
/// # Panics
///
/// If `index >= num_blocks`.
pub fn block_label(
    index: usize,
    num_blocks: usize,
) -> String {
    assert!(
        index < num_blocks,
        "block index {index} out of range for {num_blocks} blocks"
    );
    if num_blocks <= 6 {
        char::from(b'a' + index as u8).to_string()
    } else if index == 0 {
        "a".to_string()
    } else {
        format!("b{index}")
    }
}

/// The names of a conv layer and the norm layer that follows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerLabel {
    /// Conv layer name.
    pub conv: String,

    /// Norm layer name.
    pub norm: String,
}

impl LayerLabel {
    /// Create a new label.
    pub fn new<C: Into<String>, N: Into<String>>(
        conv: C,
        norm: N,
    ) -> Self {
        Self {
            conv: conv.into(),
            norm: norm.into(),
        }
    }
}

/// Tracks layer names registered into an enclosing network.
#[derive(Debug, Clone, Default)]
pub struct LayerNameRegistry {
    names: BTreeSet<String>,
}

impl LayerNameRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of registered names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Check if a name is registered.
    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.names.contains(name)
    }

    /// Register a name.
    ///
    /// # Errors
    ///
    /// If the name is already registered.
    pub fn register<S: AsRef<str>>(
        &mut self,
        name: S,
    ) -> anyhow::Result<()> {
        let name = name.as_ref();
        if !self.names.insert(name.to_string()) {
            bail!("duplicate layer name: {name}");
        }
        Ok(())
    }

    /// Register every name, or none of them.
    ///
    /// # Errors
    ///
    /// If any name is already registered, or repeated within `names`.
    pub fn register_all<I, S>(
        &mut self,
        names: I,
    ) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut staged = self.clone();
        for name in names {
            staged.register(name)?;
        }
        *self = staged;
        Ok(())
    }

    /// Iterate over the registered names, in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hamcrest::prelude::*;

    #[test]
    fn test_block_names() {
        let name = BlockName::new(2, "a");
        assert_eq!(name.to_string(), "2a");
        assert_eq!(name.conv_name(Branch::Main2a), "res2a_branch2a");
        assert_eq!(name.conv_name(Branch::Main2b), "res2a_branch2b");
        assert_eq!(name.conv_name(Branch::Main2c), "res2a_branch2c");
        assert_eq!(name.conv_name(Branch::Shortcut), "res2a_branch1");
        assert_eq!(name.norm_name(Branch::Main2c), "bn2a_branch2c");
        assert_eq!(name.norm_name(Branch::Shortcut), "bn2a_branch1");

        assert_eq!(
            name.label(Branch::Main2b),
            LayerLabel::new("res2a_branch2b", "bn2a_branch2b")
        );
    }

    #[test]
    fn test_distinct_positions_do_not_collide() {
        let branches = [Branch::Main2a, Branch::Main2b, Branch::Main2c, Branch::Shortcut];
        let mut registry = LayerNameRegistry::new();
        for name in [BlockName::new(2, "a"), BlockName::new(2, "b"), BlockName::new(3, "a")] {
            for branch in branches {
                registry.register(name.conv_name(branch)).unwrap();
                registry.register(name.norm_name(branch)).unwrap();
            }
        }
        assert_eq!(registry.len(), 24);
        assert_that!(registry.contains("res3a_branch1"), is(equal_to(true)));
    }

    #[test]
    fn test_block_label() {
        assert_eq!(block_label(0, 3), "a");
        assert_eq!(block_label(2, 3), "c");
        assert_eq!(block_label(5, 6), "f");
        assert_eq!(block_label(0, 23), "a");
        assert_eq!(block_label(1, 23), "b1");
        assert_eq!(block_label(22, 23), "b22");
    }

    #[test]
    #[should_panic(expected = "block index 26 out of range for 3 blocks")]
    fn test_block_label_out_of_range() {
        block_label(26, 3);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = LayerNameRegistry::new();
        assert!(registry.is_empty());
        registry.register("res2a_branch2a").unwrap();

        let err = registry.register("res2a_branch2a").unwrap_err();
        assert_that!(
            err.to_string(),
            equal_to("duplicate layer name: res2a_branch2a".to_string())
        );
    }

    #[test]
    fn test_register_all_is_atomic() {
        let mut registry = LayerNameRegistry::new();
        registry.register("conv1").unwrap();

        let result = registry.register_all(["res2a_branch2a", "conv1"]);
        assert!(result.is_err());
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains("res2a_branch2a"));

        registry
            .register_all(["res2a_branch2a", "bn2a_branch2a"])
            .unwrap();
        assert_eq!(
            registry.iter().collect::<Vec<_>>(),
            vec!["bn2a_branch2a", "conv1", "res2a_branch2a"]
        );
    }
}
