use std::path::PathBuf;
use std::sync::Arc;

use engine_core::{Error, Model, Result};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

use super::{AlertContext, Endpoint, RenderAlert};

/// Path that selects an in-memory buffer instead of a file.
pub const MEMORY: &str = ":memory:";

/// Shared in-memory alert output.
pub type MemoryBuffer = Arc<Mutex<String>>;

enum Target {
    Memory(MemoryBuffer),
    Path {
        path: PathBuf,
        handle: Option<tokio::fs::File>,
    },
}

/// Appends one rendered message per object to a file.
pub struct File {
    target: Target,
}

impl File {
    /// `":memory:"` writes to a fresh buffer, anything else to that file.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        if path == MEMORY {
            Self::in_memory(MemoryBuffer::default())
        } else {
            Self {
                target: Target::Path {
                    path: PathBuf::from(path),
                    handle: None,
                },
            }
        }
    }

    /// Writes to `buffer`, which the caller may keep to read the output.
    pub fn in_memory(buffer: MemoryBuffer) -> Self {
        Self {
            target: Target::Memory(buffer),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.target, Target::Memory(_))
    }

    pub fn buffer(&self) -> Option<MemoryBuffer> {
        match &self.target {
            Target::Memory(buffer) => Some(buffer.clone()),
            Target::Path { .. } => None,
        }
    }
}

#[async_trait::async_trait]
impl Endpoint for File {
    async fn setup(&mut self, _ctx: &AlertContext) -> Result<()> {
        if let Target::Path { path, handle } = &mut self.target {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&*path)
                .await
                .map_err(|e| Error::endpoint(format!("{}: {}", path.display(), e)))?;
            *handle = Some(file);
        }
        Ok(())
    }

    async fn process(&mut self, alert: &dyn RenderAlert, obj: &dyn Model) -> Result<()> {
        let message = alert.render(&*self, obj);
        match &mut self.target {
            Target::Memory(buffer) => buffer.lock().push_str(&message),
            Target::Path { path, handle } => {
                let file = handle.as_mut().ok_or_else(|| {
                    Error::endpoint(format!("{} is not open", path.display()))
                })?;
                file.write_all(message.as_bytes())
                    .await
                    .map_err(|e| Error::endpoint(format!("{}: {}", path.display(), e)))?;
            }
        }
        Ok(())
    }

    async fn teardown(&mut self, _failure: Option<&Error>) -> Result<()> {
        if let Target::Path { path, handle } = &mut self.target {
            if let Some(mut file) = handle.take() {
                file.flush()
                    .await
                    .map_err(|e| Error::endpoint(format!("{}: {}", path.display(), e)))?;
            }
        }
        Ok(())
    }
}
