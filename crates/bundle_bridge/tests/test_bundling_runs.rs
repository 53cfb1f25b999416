use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use bundle_bridge::{
    BundleConfig, File, bundle, bundle_files,
    plugin::{BuildOptions, Bundle, Bundler, GenerateOptions, GeneratedBundle, load_with},
    types::{OutputFormat, SourceMap, SourceMapMode},
};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

/// Looks up a fixed list of paths in order and reports what it saw
struct RecordingBundler {
    paths: Vec<&'static str>,
    requested: Option<mpsc::UnboundedSender<&'static str>>,
    fail_build: bool,
    fail_generate: bool,
}

impl RecordingBundler {
    fn new(paths: &[&'static str]) -> Self {
        Self {
            paths: paths.to_vec(),
            requested: None,
            fail_build: false,
            fail_generate: false,
        }
    }
}

struct RecordedBundle {
    seen: Vec<(&'static str, Option<String>)>,
    fail_generate: bool,
}

#[async_trait]
impl Bundler for RecordingBundler {
    async fn build(&self, options: BuildOptions) -> Result<Box<dyn Bundle>> {
        let mut seen = Vec::new();
        for path in &self.paths {
            if let Some(tx) = &self.requested {
                tx.send(*path).unwrap();
            }
            seen.push((*path, load_with(&options.plugins, path).await?));
        }
        if self.fail_build {
            bail!("build exploded");
        }
        Ok(Box::new(RecordedBundle {
            seen,
            fail_generate: self.fail_generate,
        }))
    }
}

#[async_trait]
impl Bundle for RecordedBundle {
    async fn generate(&self, options: GenerateOptions) -> Result<GeneratedBundle> {
        if self.fail_generate {
            bail!("generate exploded");
        }
        let code = self
            .seen
            .iter()
            .map(|(path, contents)| {
                format!("{path}={}", contents.as_deref().unwrap_or("<missing>"))
            })
            .collect::<Vec<_>>()
            .join("\n");
        let map = (options.source_map == SourceMapMode::Inline).then(|| SourceMap {
            version: 3,
            sources: self.seen.iter().map(|(p, _)| (*p).to_owned()).collect(),
            ..SourceMap::default()
        });
        Ok(GeneratedBundle { code, map })
    }
}

#[tokio::test]
async fn test_file_delivered_before_lookup() {
    let bundler = RecordingBundler::new(&["a.js"]);
    let file = bundle_files(
        BundleConfig::new("a.js"),
        Arc::new(bundler),
        [File::new("a.js", "export default 1;").with_base("src")],
    )
    .await
    .unwrap();

    assert_eq!(file.path, "a.js");
    assert_eq!(file.contents, b"a.js=export default 1;");
    assert_eq!(file.base.as_deref(), Some("src"));
}

#[tokio::test]
async fn test_lookup_issued_before_file_arrives() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut bundler = RecordingBundler::new(&["b.js"]);
    bundler.requested = Some(tx);

    let bridge = bundle(BundleConfig::new("b.js"), Arc::new(bundler));
    assert_eq!(rx.recv().await, Some("b.js"));

    bridge
        .send(File::new("b.js", "export const x=2;"))
        .await
        .unwrap();
    let file = bridge.finish().await.unwrap();

    assert_eq!(file.contents_lossy(), "b.js=export const x=2;");
}

#[tokio::test]
async fn test_missing_file_resolves_after_intake_ends() {
    let bundler = RecordingBundler::new(&["a.js", "c.js"]);
    let file = bundle_files(
        BundleConfig::new("a.js"),
        Arc::new(bundler),
        [File::new("a.js", "1")],
    )
    .await
    .unwrap();

    assert_eq!(file.contents_lossy(), "a.js=1\nc.js=<missing>");
}

#[tokio::test]
async fn test_generate_failure_emits_only_the_error() {
    let mut bundler = RecordingBundler::new(&["a.js"]);
    bundler.fail_generate = true;

    let bridge = bundle(BundleConfig::new("a.js"), Arc::new(bundler));
    let (sink, source) = bridge.split();
    sink.send(File::new("a.js", "1")).await.unwrap();
    sink.finish();

    let items: Vec<_> = source.collect().await;
    assert_eq!(items.len(), 1);
    let err = items.into_iter().next().unwrap().unwrap_err();
    assert_eq!(err.to_string(), "generate exploded");
}

#[tokio::test]
async fn test_build_failure_surfaces_verbatim() {
    let mut bundler = RecordingBundler::new(&[]);
    bundler.fail_build = true;

    let err = bundle_files(BundleConfig::new("a.js"), Arc::new(bundler), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "build exploded");
}

#[tokio::test]
async fn test_successful_run_yields_exactly_one_file() {
    let bundler = RecordingBundler::new(&["a.js"]);
    let config = BundleConfig::new("a.js")
        .with_format(OutputFormat::Cjs)
        .with_source_map(true);

    let bridge = bundle(config, Arc::new(bundler));
    let (sink, mut source) = bridge.split();
    sink.send(File::new("a.js", "export default 1;")).await.unwrap();
    sink.finish();

    let file = source.next().await.unwrap().unwrap();
    assert_eq!(file.path, "a.js");
    assert_eq!(
        file.source_map.map(|map| map.sources),
        Some(vec!["a.js".to_owned()])
    );
    assert!(source.next().await.is_none());
}

#[tokio::test]
async fn test_entry_base_follows_first_lookup() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut bundler = RecordingBundler::new(&["main.js", "dep.js"]);
    bundler.requested = Some(tx);

    let bridge = bundle(BundleConfig::new("main.js"), Arc::new(bundler));
    bridge
        .send(File::new("dep.js", "dep").with_base("lib"))
        .await
        .unwrap();
    assert_eq!(rx.recv().await, Some("main.js"));
    bridge
        .send(File::new("main.js", "main").with_base("app"))
        .await
        .unwrap();

    let file = bridge.finish().await.unwrap();
    assert_eq!(file.base.as_deref(), Some("app"));
    assert_eq!(file.contents_lossy(), "main.js=main\ndep.js=dep");
}

#[tokio::test]
async fn test_entry_base_absent_when_entry_never_arrives() {
    let bundler = RecordingBundler::new(&["ghost.js"]);
    let file = bundle_files(
        BundleConfig::new("ghost.js"),
        Arc::new(bundler),
        [File::new("other.js", "x").with_base("lib")],
    )
    .await
    .unwrap();

    assert_eq!(file.base, None);
    assert_eq!(file.contents_lossy(), "ghost.js=<missing>");
}

#[tokio::test]
async fn test_later_registration_is_seen_by_later_lookups() {
    let bundler = RecordingBundler::new(&["a.js"]);
    let file = bundle_files(
        BundleConfig::new("a.js"),
        Arc::new(bundler),
        [File::new("a.js", "old"), File::new("a.js", "new")],
    )
    .await
    .unwrap();

    // The lookup may have raced either registration, but never sees anything else
    let contents = file.contents_lossy();
    assert!(contents == "a.js=old" || contents == "a.js=new", "{contents}");
}

/// Panics on build instead of returning an error
struct PanickingBundler;

#[async_trait]
impl Bundler for PanickingBundler {
    async fn build(&self, options: BuildOptions) -> Result<Box<dyn Bundle>> {
        load_with(&options.plugins, &options.entry).await?;
        panic!("resolver state corrupted");
    }
}

#[tokio::test]
async fn test_bundler_panic_is_emitted_as_the_only_error() {
    let bridge = bundle(BundleConfig::new("a.js"), Arc::new(PanickingBundler));
    let (sink, source) = bridge.split();
    sink.send(File::new("a.js", "1")).await.unwrap();
    sink.finish();

    let items: Vec<_> = source.collect().await;
    assert_eq!(items.len(), 1);
    let err = items.into_iter().next().unwrap().unwrap_err();
    assert_eq!(err.to_string(), "Bundler panicked: resolver state corrupted");
}
