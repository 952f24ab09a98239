//! Thread-safe parser pool for tree-sitter parsers
//!
//! Tree-sitter parsers are not `Sync`, so each worker thread owns one and
//! requests are handed to the workers over a channel. Structure builders run
//! synchronously inside model operations and block on the reply.

use anyhow::{Result, anyhow};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use tree_sitter::{Language, Parser, Tree};

/// Languages the pool can parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Rust,
    Python,
}

impl FileType {
    /// Determine file type from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "rs" => Some(FileType::Rust),
            "py" | "pyi" => Some(FileType::Python),
            _ => None,
        }
    }

    pub fn language(&self) -> Language {
        match self {
            FileType::Rust => tree_sitter_rust::LANGUAGE.into(),
            FileType::Python => tree_sitter_python::LANGUAGE.into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Rust => "rust",
            FileType::Python => "python",
        }
    }
}

/// A parsing request sent to the parser pool
#[derive(Debug)]
pub struct ParseRequest {
    pub file_type: FileType,
    pub content: Arc<str>,
}

struct WorkerRequest {
    request: ParseRequest,
    response_sender: Sender<Result<Tree>>,
}

/// Handle to the parser workers. Clones share the workers, which shut down
/// once the last handle is dropped.
#[derive(Clone)]
pub struct ParserPool {
    sender: Sender<WorkerRequest>,
    workers: usize,
}

impl ParserPool {
    /// Create a new parser pool with the specified number of worker threads
    pub fn new(num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        let (sender, receiver) = mpsc::channel::<WorkerRequest>();
        let receiver = Arc::new(Mutex::new(receiver));

        for i in 0..num_workers {
            let receiver = receiver.clone();
            std::thread::spawn(move || {
                Self::worker_thread(i, receiver);
            });
        }

        Self {
            sender,
            workers: num_workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    fn worker_thread(worker_id: usize, receiver: Arc<Mutex<Receiver<WorkerRequest>>>) {
        tracing::debug!("Parser worker {} started", worker_id);

        let mut parser = Parser::new();
        let mut current: Option<FileType> = None;

        loop {
            // A worker that panicked while holding the lock leaves the receiver intact.
            let next = receiver
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recv();
            let Ok(WorkerRequest {
                request,
                response_sender,
            }) = next
            else {
                tracing::debug!("Parser worker {} shutting down", worker_id);
                break;
            };

            if current != Some(request.file_type) {
                if let Err(e) = parser.set_language(&request.file_type.language()) {
                    let _ = response_sender.send(Err(anyhow!("Failed to set language: {}", e)));
                    continue;
                }
                current = Some(request.file_type);
            }

            let result = parser
                .parse(request.content.as_bytes(), None)
                .ok_or_else(|| anyhow!("Failed to parse {} content", request.file_type.as_str()));

            if response_sender.send(result).is_err() {
                tracing::warn!("Failed to send parse result back to caller");
            }
        }
    }

    /// Parse content, blocking the current thread until a worker replies.
    pub fn parse_blocking(&self, request: ParseRequest) -> Result<Tree> {
        let (response_sender, response_receiver) = mpsc::channel();

        self.sender
            .send(WorkerRequest {
                request,
                response_sender,
            })
            .map_err(|_| anyhow!("Parser pool is shut down"))?;

        response_receiver
            .recv()
            .map_err(|_| anyhow!("Parser worker died"))?
    }
}

/// Parser pool with `workers` threads, or one per CPU (at least 2).
pub fn create_parser_pool(workers: Option<usize>) -> ParserPool {
    let num_workers = workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get().max(2))
            .unwrap_or(2)
    });

    ParserPool::new(num_workers)
}
