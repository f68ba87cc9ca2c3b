//! Workload descriptors handed to the child process.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::{CollectError, CollectErrorKind};

/// One training case: an operation and the inputs to build it with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    /// Human-readable case name used in logs and reports.
    pub name: String,
    /// Operation the child should compile, e.g. `conv2d` or `dot`.
    pub operation: String,
    /// Positional tensors and keyword options, in call order.
    #[serde(default)]
    pub inputs: Vec<WorkloadInput>,
}

/// An input to a workload's operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkloadInput {
    /// A tensor placeholder.
    Tensor { shape: Vec<u64>, dtype: String },
    /// A keyword option such as `strides` or `padding`.
    Scalar {
        name: String,
        value: serde_json::Value,
    },
}

impl Workload {
    /// Tensor inputs, skipping keyword options.
    pub fn tensors(&self) -> impl Iterator<Item = (&[u64], &str)> {
        self.inputs.iter().filter_map(|input| match input {
            WorkloadInput::Tensor { shape, dtype } => {
                Some((shape.as_slice(), dtype.as_str()))
            }
            WorkloadInput::Scalar { .. } => None,
        })
    }

    /// Serializes the workload into the form passed to the child.
    pub fn to_json(&self) -> Result<String, CollectError> {
        serde_json::to_string(self)
            .map_err(|e| CollectError::new(CollectErrorKind::Workload(e)))
    }
}

/// Reads a JSON array of workloads.
///
/// Every workload needs a name and an operation; anything else about the
/// inputs is left for the child to judge.
pub fn load_workloads(
    reader: impl Read,
) -> Result<Vec<Workload>, CollectError> {
    let workloads: Vec<Workload> = serde_json::from_reader(reader)
        .map_err(|e| CollectError::new(CollectErrorKind::Workload(e)))?;
    for (idx, workload) in workloads.iter().enumerate() {
        if workload.name.trim().is_empty() {
            return Err(CollectError::config(format!(
                "workload #{} has no name",
                idx + 1
            )));
        }
        if workload.operation.trim().is_empty() {
            return Err(CollectError::config(format!(
                "workload `{}` has no operation",
                workload.name
            )));
        }
    }
    Ok(workloads)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONV: &str = r#"[
        {
            "name": "conv2d 56x56 64->256",
            "operation": "conv2d",
            "inputs": [
                {"kind": "tensor", "shape": [1, 56, 56, 64], "dtype": "float32"},
                {"kind": "tensor", "shape": [1, 1, 64, 256], "dtype": "float32"},
                {"kind": "scalar", "name": "strides", "value": [1, 1]},
                {"kind": "scalar", "name": "padding", "value": "valid"}
            ]
        }
    ]"#;

    #[test]
    fn test_load_workloads() {
        let workloads = load_workloads(CONV.as_bytes()).unwrap();
        assert_eq!(workloads.len(), 1);
        let w = &workloads[0];
        assert_eq!(w.operation, "conv2d");
        let tensors: Vec<_> = w.tensors().collect();
        assert_eq!(tensors.len(), 2);
        assert_eq!(tensors[0], (&[1, 56, 56, 64][..], "float32"));
        assert_eq!(
            w.inputs[3],
            WorkloadInput::Scalar {
                name: "padding".into(),
                value: serde_json::json!("valid"),
            }
        );
    }

    #[test]
    fn test_json_round_trip_keeps_discriminant() {
        let w = &load_workloads(CONV.as_bytes()).unwrap()[0];
        let json = w.to_json().unwrap();
        assert!(json.contains(r#""kind":"scalar""#));
        let back: Workload = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, w);
    }

    #[test]
    fn test_untagged_input_rejected() {
        let err = load_workloads(
            r#"[{"name": "d", "operation": "dot", "inputs": [{"shape": [2]}]}]"#
                .as_bytes(),
        )
        .unwrap_err();
        assert!(err.is_workload());
    }

    #[test]
    fn test_missing_operation_rejected() {
        let err =
            load_workloads(r#"[{"name": "d", "operation": " "}]"#.as_bytes())
                .unwrap_err();
        assert!(err.is_config());
    }
}
