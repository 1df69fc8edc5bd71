use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::OutputConfig;

/// Computes where a converted file is written.
#[derive(Debug, Clone)]
pub struct OutputPathResolver {
    prefix: String,
    extension: String,
    directory: Option<PathBuf>,
}

impl OutputPathResolver {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            extension: config.extension.trim_start_matches('.').to_string(),
            directory: config.directory.clone(),
        }
    }

    /// `<dir>/<prefix><stem>.<extension>`, where `<dir>` is the source's own
    /// directory unless an output directory is configured.
    pub fn resolve<P: AsRef<Path>>(&self, source: P) -> PathBuf {
        self.candidate(source.as_ref(), 1)
    }

    /// Start disambiguating outputs for one batch.
    pub fn allocator<'a, I, P>(&'a self, sources: I) -> BatchPathAllocator<'a>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        BatchPathAllocator {
            resolver: self,
            claimed: sources.into_iter().map(|p| p.as_ref().to_path_buf()).collect(),
        }
    }

    fn candidate(&self, source: &Path, attempt: usize) -> PathBuf {
        let parent = match &self.directory {
            Some(dir) => dir.as_path(),
            None => source.parent().unwrap_or(Path::new(".")),
        };
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());

        let name = if attempt <= 1 {
            format!("{}{}.{}", self.prefix, stem, self.extension)
        } else {
            format!("{}{}-{}.{}", self.prefix, stem, attempt, self.extension)
        };
        parent.join(name)
    }
}

/// Hands out output paths that are unique within one batch.
///
/// The batch's source paths are claimed up front so an output can never
/// overwrite another input of the same batch.
#[derive(Debug)]
pub struct BatchPathAllocator<'a> {
    resolver: &'a OutputPathResolver,
    claimed: HashSet<PathBuf>,
}

impl BatchPathAllocator<'_> {
    pub fn allocate<P: AsRef<Path>>(&mut self, source: P) -> PathBuf {
        let source = source.as_ref();
        let mut attempt = 1;
        loop {
            let path = self.resolver.candidate(source, attempt);
            if self.claimed.insert(path.clone()) {
                return path;
            }
            attempt += 1;
        }
    }
}
