//! Node endpoints: where a node's PULL socket lives.
//!
//! Same-host meshes use IPC sockets under [`IPC_DIR`], named `node-<id>` by
//! the generated configs. Distributed meshes use TCP.

use std::io::ErrorKind;
use std::path::Path;

use tracing::debug;

use crate::error::EisenbahnError;

/// Directory holding the IPC socket files of a same-host mesh.
pub const IPC_DIR: &str = "/tmp/weave";

/// A node's PULL endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Socket file `<IPC_DIR>/<name>.sock`.
    Ipc(String),
    Tcp { host: String, port: u16 },
}

impl Transport {
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Parse a configured endpoint, `ipc://<dir>/<name>.sock` or
    /// `tcp://<host>:<port>`. Only the file stem of an IPC path is kept.
    pub fn parse(endpoint: &str) -> Option<Self> {
        if let Some(path) = endpoint.strip_prefix("ipc://") {
            let name = Path::new(path).file_stem()?.to_str()?;
            return Some(Self::ipc(name));
        }
        let (host, port) = endpoint.strip_prefix("tcp://")?.rsplit_once(':')?;
        Some(Self::tcp(host, port.parse().ok()?))
    }

    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc://{IPC_DIR}/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    fn socket_file(&self) -> Option<String> {
        match self {
            Self::Ipc(name) => Some(format!("{IPC_DIR}/{name}.sock")),
            Self::Tcp { .. } => None,
        }
    }

    /// Get the filesystem ready for a bind: create [`IPC_DIR`] and remove a
    /// socket file left by a node that exited without unbinding.
    pub fn prepare_bind(&self) -> Result<(), EisenbahnError> {
        let Some(file) = self.socket_file() else {
            return Ok(());
        };
        let io = |e: std::io::Error| EisenbahnError::Transport(format!("{file}: {e}"));
        std::fs::create_dir_all(IPC_DIR).map_err(io)?;
        match std::fs::remove_file(&file) {
            Ok(()) => debug!(file = %file, "removed stale node socket"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io(e)),
        }
        Ok(())
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.endpoint())
    }
}
