use crate::{Error, FlakeId, Result};

/// The identity a generator stamps into every ID.
///
/// Both IDs must fit their 6-bit fields. Construction rejects anything larger
/// instead of masking it, since a truncated ID would silently collide with
/// another host's.
///
/// ```
/// use flakeguard::NodeConfig;
///
/// let config = NodeConfig::try_new(3, 7).unwrap();
/// assert_eq!(config.machine_id(), 3);
/// assert!(NodeConfig::try_new(64, 0).is_err());
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "NodeConfigRepr"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeConfig {
    machine_id: u64,
    node_id: u64,
}

impl NodeConfig {
    /// Validates and builds a config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] when either ID exceeds 63.
    pub fn try_new(machine_id: u64, node_id: u64) -> Result<Self> {
        check("machine_id", machine_id, FlakeId::max_machine_id())?;
        check("node_id", node_id, FlakeId::max_node_id())?;
        Ok(Self {
            machine_id,
            node_id,
        })
    }

    pub const fn machine_id(&self) -> u64 {
        self.machine_id
    }

    pub const fn node_id(&self) -> u64 {
        self.node_id
    }
}

fn check(field: &'static str, value: u64, max: u64) -> Result<()> {
    if value > max {
        return Err(Error::ConfigInvalid { field, value, max });
    }
    Ok(())
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct NodeConfigRepr {
    machine_id: u64,
    node_id: u64,
}

#[cfg(feature = "serde")]
impl TryFrom<NodeConfigRepr> for NodeConfig {
    type Error = Error;

    fn try_from(repr: NodeConfigRepr) -> Result<Self> {
        Self::try_new(repr.machine_id, repr.node_id)
    }
}
