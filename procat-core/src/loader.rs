//! # Descriptor Loading
//!
//! This module turns a proto source specifier into a
//! [`FileDescriptorSet`]. Four source kinds are supported:
//!
//! 1. **Local path**: a directory containing a compilable proto module,
//!    built with the external schema compiler (`buf build`).
//! 2. **Git repository**: shallow-cloned to a temp directory, then loaded
//!    as a local path.
//! 3. **Registry module**: exported from a Buf-style schema registry
//!    (`buf export`), then loaded as a local path.
//! 4. **Server reflection**: fetched from a live gRPC endpoint speaking
//!    the v1alpha reflection protocol (see [`reflection`]).
//!
//! All temp files and directories are removed on every exit path.

pub mod reflection;
pub mod subprocess;

use prost::Message;
use prost_types::FileDescriptorSet;

pub use subprocess::{CommandOutput, CommandRunner, SystemRunner};

/// Dial + discovery timeout applied when a reflection source does not
/// specify its own.
pub const DEFAULT_REFLECTION_TIMEOUT_SECS: u64 = 10;

/// A proto source specifier, one of the four supported kinds.
#[derive(Debug, Clone)]
pub enum ProtoSource {
    /// Local directory containing a compilable proto module.
    Path(String),
    /// Git repository in `host/owner/repo[/subdir]` form.
    GitRepo(String),
    /// Schema-registry module in `registry/owner/module` form.
    RegistryModule(String),
    /// Live reflection-enabled endpoint in `host:port` form.
    Reflection {
        endpoint: String,
        options: ReflectionOptions,
    },
}

/// Options for reflection-based discovery.
#[derive(Debug, Clone, Default)]
pub struct ReflectionOptions {
    pub use_tls: bool,
    /// SNI override for TLS verification. Ignored when empty.
    pub server_name: String,
    /// Dial timeout; non-positive values fall back to
    /// [`DEFAULT_REFLECTION_TIMEOUT_SECS`].
    pub timeout_seconds: i32,
}

/// Errors that can occur while acquiring a descriptor set.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("source is invalid: {0}")]
    SourceInvalid(String),

    #[error("schema compiler failed: {stderr}")]
    CompilerFailed { stderr: String },

    #[error("git clone failed: {stderr}")]
    VcsFailed { stderr: String },

    #[error("failed to connect to '{endpoint}': {source}")]
    SourceUnreachable {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("reflection not supported by server: {0}")]
    ReflectionUnsupported(#[source] reflection::ReflectionLoadError),

    #[error("no service descriptors found via reflection")]
    EmptyResult,

    #[error("descriptor set is malformed: {0}")]
    DecodeFailed(#[from] prost::DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Acquires descriptor sets from any [`ProtoSource`].
///
/// The external tools it drives (`buf`, `git`) are reached through the
/// [`CommandRunner`] seam; [`SystemRunner`] is the production default.
pub struct Loader<R = SystemRunner> {
    runner: R,
    buf_bin: String,
    git_bin: String,
}

impl Loader {
    pub fn new() -> Self {
        Self::with_runner(SystemRunner)
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> Loader<R> {
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            buf_bin: "buf".to_string(),
            git_bin: "git".to_string(),
        }
    }

    /// Overrides the schema compiler binary (default `buf`).
    pub fn buf_bin(mut self, bin: impl Into<String>) -> Self {
        self.buf_bin = bin.into();
        self
    }

    /// Overrides the VCS binary (default `git`).
    pub fn git_bin(mut self, bin: impl Into<String>) -> Self {
        self.git_bin = bin.into();
        self
    }

    /// Dispatches to the loader for the given source kind.
    pub async fn load(&self, source: &ProtoSource) -> Result<FileDescriptorSet, LoadError> {
        match source {
            ProtoSource::Path(path) => self.load_from_path(path).await,
            ProtoSource::GitRepo(repo) => self.load_from_git(repo).await,
            ProtoSource::RegistryModule(module) => self.load_from_module(module).await,
            ProtoSource::Reflection { endpoint, options } => {
                reflection::load(endpoint, options).await
            }
        }
    }

    /// Loads descriptors from a local directory by running
    /// `buf build <path> -o <tmpfile>` and decoding the output.
    pub async fn load_from_path(&self, path: &str) -> Result<FileDescriptorSet, LoadError> {
        tokio::fs::metadata(path)
            .await
            .map_err(|err| LoadError::SourceInvalid(format!("path '{path}' does not exist: {err}")))?;

        // Removed on drop, covering every exit below.
        let out_file = tempfile::Builder::new()
            .prefix("procat-")
            .suffix(".bin")
            .tempfile()?;
        let out_path = out_file.path().to_string_lossy().into_owned();

        let output = self
            .runner
            .run(&self.buf_bin, &["build", path, "-o", &out_path])
            .await?;
        if !output.success {
            return Err(LoadError::CompilerFailed {
                stderr: output.stderr,
            });
        }

        let data = tokio::fs::read(&out_path).await?;
        let fds = FileDescriptorSet::decode(data.as_slice())?;
        Ok(fds)
    }

    /// Loads descriptors from a Git repository given as
    /// `host/owner/repo[/subdir]`. The repository is shallow-cloned to a
    /// temp directory and the (optional) subdirectory is loaded as a local
    /// path.
    pub async fn load_from_git(&self, repo: &str) -> Result<FileDescriptorSet, LoadError> {
        let segments: Vec<&str> = repo
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if segments.len() < 3 {
            return Err(LoadError::SourceInvalid(format!(
                "expected host/owner/repo[/subdir], got '{repo}'"
            )));
        }
        let clone_url = format!("https://{}.git", segments[..3].join("/"));
        let subdir = segments[3..].join("/");

        let tmp = tempfile::Builder::new().prefix("procat-git-").tempdir()?;
        let clone_dir = tmp.path().to_string_lossy().into_owned();

        let output = self
            .runner
            .run(&self.git_bin, &["clone", "--depth", "1", &clone_url, &clone_dir])
            .await?;
        if !output.success {
            return Err(LoadError::VcsFailed {
                stderr: output.stderr,
            });
        }

        let build_root = if subdir.is_empty() {
            tmp.path().to_path_buf()
        } else {
            tmp.path().join(&subdir)
        };
        self.load_from_path(&build_root.to_string_lossy()).await
    }

    /// Loads descriptors from a schema-registry module by exporting it to a
    /// temp directory (`buf export`) and loading the export as a local
    /// path.
    pub async fn load_from_module(&self, module: &str) -> Result<FileDescriptorSet, LoadError> {
        let tmp = tempfile::Builder::new().prefix("procat-buf-").tempdir()?;
        let export_dir = tmp.path().to_string_lossy().into_owned();

        let output = self
            .runner
            .run(&self.buf_bin, &["export", module, "-o", &export_dir])
            .await?;
        if !output.success {
            return Err(LoadError::CompilerFailed {
                stderr: output.stderr,
            });
        }

        self.load_from_path(&export_dir).await
    }
}

/// Flat, non-recursive summary of a descriptor set.
#[derive(Debug, Clone, Default)]
pub struct DescriptorInfo {
    pub file_count: usize,
    /// Fully-qualified names of top-level services.
    pub services: Vec<String>,
    /// Fully-qualified names of top-level messages.
    pub messages: Vec<String>,
    /// Fully-qualified names of top-level enums.
    pub enums: Vec<String>,
}

/// Extracts metadata from a descriptor set without resolving it.
pub fn descriptor_info(fds: &FileDescriptorSet) -> DescriptorInfo {
    let mut info = DescriptorInfo {
        file_count: fds.file.len(),
        ..Default::default()
    };

    for file in &fds.file {
        let pkg = file.package();
        for svc in &file.service {
            info.services.push(qualify(pkg, svc.name()));
        }
        for msg in &file.message_type {
            info.messages.push(qualify(pkg, msg.name()));
        }
        for en in &file.enum_type {
            info.enums.push(qualify(pkg, en.name()));
        }
    }

    info
}

fn qualify(pkg: &str, name: &str) -> String {
    if pkg.is_empty() {
        name.to_string()
    } else {
        format!("{pkg}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::{
        DescriptorProto, EnumDescriptorProto, FileDescriptorProto, ServiceDescriptorProto,
    };
    use std::io;
    use std::sync::Mutex;

    /// Scripted [`CommandRunner`] that records invocations and optionally
    /// writes a descriptor file when it sees an `-o <path>` argument.
    struct FakeRunner {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        output: CommandOutput,
        descriptor_bytes: Option<Vec<u8>>,
    }

    impl FakeRunner {
        fn succeeding(descriptor_bytes: Vec<u8>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                output: CommandOutput {
                    success: true,
                    ..Default::default()
                },
                descriptor_bytes: Some(descriptor_bytes),
            }
        }

        fn failing(stderr: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                output: CommandOutput {
                    success: false,
                    stderr: stderr.to_string(),
                    ..Default::default()
                },
                descriptor_bytes: None,
            }
        }
    }

    impl CommandRunner for FakeRunner {
        async fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
            self.calls.lock().unwrap().push((
                program.to_string(),
                args.iter().map(|a| a.to_string()).collect(),
            ));
            if let Some(bytes) = &self.descriptor_bytes {
                if let Some(pos) = args.iter().position(|a| *a == "-o") {
                    std::fs::write(args[pos + 1], bytes)?;
                }
            }
            Ok(self.output.clone())
        }
    }

    fn sample_fds() -> FileDescriptorSet {
        FileDescriptorSet {
            file: vec![FileDescriptorProto {
                name: Some("greet.proto".to_string()),
                package: Some("greet.v1".to_string()),
                syntax: Some("proto3".to_string()),
                message_type: vec![
                    DescriptorProto {
                        name: Some("HelloRequest".to_string()),
                        ..Default::default()
                    },
                    DescriptorProto {
                        name: Some("HelloResponse".to_string()),
                        ..Default::default()
                    },
                ],
                enum_type: vec![EnumDescriptorProto {
                    name: Some("Mood".to_string()),
                    ..Default::default()
                }],
                service: vec![ServiceDescriptorProto {
                    name: Some("GreetService".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    #[tokio::test]
    async fn path_loader_builds_and_decodes() {
        let fds = sample_fds();
        let runner = FakeRunner::succeeding(fds.encode_to_vec());
        let loader = Loader::with_runner(runner);

        let dir = tempfile::tempdir().unwrap();
        let loaded = loader
            .load_from_path(&dir.path().to_string_lossy())
            .await
            .unwrap();

        assert_eq!(loaded.file.len(), 1);
        assert_eq!(loaded.file[0].name(), "greet.proto");
    }

    #[tokio::test]
    async fn path_loader_rejects_missing_directory() {
        let loader = Loader::with_runner(FakeRunner::succeeding(Vec::new()));
        let err = loader
            .load_from_path("/nonexistent/procat-test")
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::SourceInvalid(_)));
    }

    #[tokio::test]
    async fn path_loader_surfaces_compiler_stderr() {
        let loader = Loader::with_runner(FakeRunner::failing("greet.proto:4:1: syntax error"));
        let dir = tempfile::tempdir().unwrap();

        let err = loader
            .load_from_path(&dir.path().to_string_lossy())
            .await
            .unwrap_err();
        match err {
            LoadError::CompilerFailed { stderr } => {
                assert!(stderr.contains("syntax error"));
            }
            other => panic!("expected CompilerFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn path_loader_rejects_malformed_descriptor_bytes() {
        let loader = Loader::with_runner(FakeRunner::succeeding(vec![0xff, 0xff, 0xff, 0xff]));
        let dir = tempfile::tempdir().unwrap();

        let err = loader
            .load_from_path(&dir.path().to_string_lossy())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::DecodeFailed(_)));
    }

    #[tokio::test]
    async fn git_loader_rejects_short_specifier() {
        let loader = Loader::with_runner(FakeRunner::succeeding(Vec::new()));
        let err = loader.load_from_git("github.com/owner").await.unwrap_err();
        assert!(matches!(err, LoadError::SourceInvalid(_)));
    }

    #[tokio::test]
    async fn git_loader_surfaces_clone_stderr() {
        let loader = Loader::with_runner(FakeRunner::failing("fatal: repository not found"));
        let err = loader
            .load_from_git("github.com/owner/repo")
            .await
            .unwrap_err();
        match err {
            LoadError::VcsFailed { stderr } => assert!(stderr.contains("not found")),
            other => panic!("expected VcsFailed, got {other:?}"),
        }
    }

    #[test]
    fn descriptor_info_counts_top_level_symbols() {
        let info = descriptor_info(&sample_fds());
        assert_eq!(info.file_count, 1);
        assert_eq!(info.services, vec!["greet.v1.GreetService"]);
        assert_eq!(
            info.messages,
            vec!["greet.v1.HelloRequest", "greet.v1.HelloResponse"]
        );
        assert_eq!(info.enums, vec!["greet.v1.Mood"]);
    }
}
