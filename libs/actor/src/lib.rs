pub mod http;
pub mod k8s;

#[cfg(feature = "schemars")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Operation performed on the bound Kubernetes resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    #[default]
    Create,
    Delete,
    /// Monotone-up: `exec` never reduces replicas; only the idle check
    /// scales down.
    Scale,
}

serde_plain::derive_display_from_serialize!(Operation);
serde_plain::derive_fromstr_from_deserialize!(Operation);

#[cfg(test)]
mod test {
    use super::Operation;

    #[test]
    fn test_operation_wire_format() {
        assert_eq!(Operation::Scale.to_string(), "scale");
        assert_eq!("create".parse::<Operation>().unwrap(), Operation::Create);
        assert!("patch".parse::<Operation>().is_err());
    }
}
