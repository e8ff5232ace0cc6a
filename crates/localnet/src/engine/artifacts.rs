use alloy_primitives::{B256, keccak256};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const WASM_FILE: &str = "poseidon_anchor_2.wasm";
pub const WITNESS_CALCULATOR_FILE: &str = "witness_calculator.js";
pub const ZKEY_FILE: &str = "circuit_final.zkey";

#[derive(Debug, thiserror::Error)]
#[error("failed to read circuit artifact {}", .path.display())]
pub struct ArtifactError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Proving and verification artifacts for the two-edge anchor circuit.
#[derive(Clone, PartialEq, Eq)]
pub struct CircuitArtifacts {
    pub wasm: Vec<u8>,
    pub witness_calculator: Vec<u8>,
    pub zkey: Vec<u8>,
}

impl std::fmt::Debug for CircuitArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitArtifacts")
            .field("wasm_len", &self.wasm.len())
            .field("witness_calculator_len", &self.witness_calculator.len())
            .field("zkey_len", &self.zkey.len())
            .field("digest", &self.digest())
            .finish()
    }
}

impl CircuitArtifacts {
    /// Reads the three artifact files from `dir`.
    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let read = |file: &str| {
            let path = dir.join(file);
            std::fs::read(&path).map_err(|source| ArtifactError { path, source })
        };

        let artifacts = Self {
            wasm: read(WASM_FILE)?,
            witness_calculator: read(WITNESS_CALCULATOR_FILE)?,
            zkey: read(ZKEY_FILE)?,
        };
        debug!(dir = %dir.display(), digest = %artifacts.digest(), "loaded circuit artifacts");
        Ok(artifacts)
    }

    pub fn is_empty(&self) -> bool {
        self.wasm.is_empty() || self.witness_calculator.is_empty() || self.zkey.is_empty()
    }

    /// Hash binding all three files.
    pub fn digest(&self) -> B256 {
        let mut buf = Vec::with_capacity(96);
        buf.extend_from_slice(keccak256(&self.wasm).as_slice());
        buf.extend_from_slice(keccak256(&self.witness_calculator).as_slice());
        buf.extend_from_slice(keccak256(&self.zkey).as_slice());
        keccak256(buf)
    }
}
