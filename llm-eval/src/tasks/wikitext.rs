use super::{EvalTask, TaskContext, TaskInput, TaskKind, window_stream};
use crate::{
    EvalParams, Result, TaskError,
    source::{Sources, cache_path, read_or_create, wikitext_detokenize},
};
use globset::{Glob, GlobMatcher};
use std::{
    io::{Cursor, Read},
    path::Path,
    sync::LazyLock,
};
use zip::ZipArchive;

static TEST_SPLIT: LazyLock<GlobMatcher> =
    LazyLock::new(|| Glob::new("**/wiki.test.raw").unwrap().compile_matcher());

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WikitextVersion {
    V2,
    V103,
}

impl WikitextVersion {
    pub fn name(self) -> &'static str {
        match self {
            Self::V2 => "wikitext2",
            Self::V103 => "wikitext103",
        }
    }

    pub fn url(self) -> &'static str {
        match self {
            Self::V2 => "https://s3.amazonaws.com/research.metamind.io/wikitext/wikitext-2-raw-v1.zip",
            Self::V103 => {
                "https://s3.amazonaws.com/research.metamind.io/wikitext/wikitext-103-raw-v1.zip"
            }
        }
    }
}

/// WikiText 测试集：整篇编码后切成 `n_ctx - 1` 长的片段，每段加 eos 正好一行。
pub struct Wikitext {
    pub version: WikitextVersion,
}

impl Wikitext {
    pub const V2: Self = Self {
        version: WikitextVersion::V2,
    };
    pub const V103: Self = Self {
        version: WikitextVersion::V103,
    };

    // 切片长度取决于 n_ctx，缓存名里也带上
    fn cache_path(&self, params: &EvalParams) -> std::path::PathBuf {
        cache_path(
            params,
            &format!("{}_ctx{}", self.version.name(), params.n_ctx),
        )
    }

    fn tokens(&self, params: &EvalParams, path: &Path, sources: &Sources) -> Result<Vec<Vec<u32>>> {
        let chunk = params.n_ctx - 1;
        if chunk == 0 {
            return Err(TaskError::config("wikitext needs n_ctx of at least 2"));
        }

        read_or_create(path, || {
            let archive = sources.fetch(self.version.url())?;
            let text = wikitext_detokenize(&test_split(archive)?);
            let ids = sources.encoder(params)?.encode(&text)?;
            tracing::info!(
                "{} test split: {} tokens in chunks of {chunk}",
                self.version.name(),
                ids.len()
            );
            Ok(ids.chunks(chunk).map(<[u32]>::to_vec).collect())
        })
    }
}

/// 从压缩包中读出 `wiki.test.raw`。
fn test_split(archive: Vec<u8>) -> Result<String> {
    let zip_err = |e: zip::result::ZipError| TaskError::source(format!("wikitext archive: {e}"));

    let mut archive = ZipArchive::new(Cursor::new(archive)).map_err(zip_err)?;
    let Some(name) = archive
        .file_names()
        .find(|name| TEST_SPLIT.is_match(name))
        .map(String::from)
    else {
        return Err(TaskError::source("wikitext archive has no wiki.test.raw"));
    };

    let mut text = String::new();
    archive
        .by_name(&name)
        .map_err(zip_err)?
        .read_to_string(&mut text)
        .map_err(|e| TaskError::source(format!("wikitext {name}: {e}")))?;
    Ok(text)
}

impl EvalTask for Wikitext {
    fn kind(&self) -> TaskKind {
        match self.version {
            WikitextVersion::V2 => TaskKind::Wikitext2,
            WikitextVersion::V103 => TaskKind::Wikitext103,
        }
    }

    fn init(&self, params: &EvalParams, sources: &Sources) -> Result<TaskContext> {
        params.validate()?;

        let tokens_path = self.cache_path(params);
        let docs = self.tokens(params, &tokens_path, sources)?;
        let stream = window_stream(params, &docs)?;
        Ok(TaskContext {
            kind: self.kind(),
            params: params.clone(),
            tokens_path,
            n_steps: stream.steps_per_pass(),
        })
    }

    fn input(&self, ctx: &TaskContext, sources: &Sources) -> Result<TaskInput> {
        let docs = self.tokens(&ctx.params, &ctx.tokens_path, sources)?;
        window_stream(&ctx.params, &docs).map(TaskInput::Windows)
    }
}

#[cfg(test)]
fn archive(name: &str, text: impl AsRef<[u8]>) -> Vec<u8> {
    use std::io::Write;
    use zip::{ZipWriter, write::SimpleFileOptions};

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(name, SimpleFileOptions::default()).unwrap();
    zip.write_all(text.as_ref()).unwrap();
    zip.finish().unwrap().into_inner()
}

#[test]
fn test_init_and_input() {
    use crate::source::test_utils::{FakeFetch, offline, sources};

    let dir = tempfile::tempdir().unwrap();
    let mut params = EvalParams::new(4, 100, "tokenizer.json");
    params.eval_batch_size = 1;
    params.cache_dir = dir.path().into();

    let mut fetch = FakeFetch::default();
    fetch.files.insert(
        WikitextVersion::V2.url().into(),
        archive("wikitext-2-raw/wiki.test.raw", " = Title = \n a bb ccc , dddd\n"),
    );
    // 还原后为 " = Title =\na bb ccc, dddd\n"，词长 1 5 1 1 2 4 4
    let ctx = Wikitext::V2.init(&params, &sources(fetch)).unwrap();
    assert_eq!(ctx.kind, TaskKind::Wikitext2);
    assert_eq!(ctx.n_steps, 3);
    assert!(
        ctx.tokens_path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("wikitext2_ctx4_")
    );

    let TaskInput::Windows(stream) = Wikitext::V2.input(&ctx, &offline()).unwrap() else {
        panic!("wikitext yields windows")
    };
    let rows = stream.take(3).map(|b| b.inputs).collect::<Vec<_>>();
    assert_eq!(rows, [[1, 5, 1, 0], [1, 2, 4, 0], [4, 0, 1, 1]]);
}

#[test]
fn test_missing_split() {
    use crate::source::test_utils::{FakeFetch, sources};

    let dir = tempfile::tempdir().unwrap();
    let mut params = EvalParams::new(4, 100, "tokenizer.json");
    params.cache_dir = dir.path().into();

    let mut fetch = FakeFetch::default();
    fetch.files.insert(
        WikitextVersion::V103.url().into(),
        archive("wikitext-103-raw/wiki.train.raw", "a b c"),
    );
    fetch
        .files
        .insert(WikitextVersion::V2.url().into(), b"not a zip".to_vec());
    let sources = sources(fetch);

    for task in [Wikitext::V103, Wikitext::V2] {
        assert!(matches!(
            task.init(&params, &sources),
            Err(TaskError::SourceUnavailable(_))
        ));
    }
}

#[test]
fn test_tiny_context() {
    use crate::source::test_utils::offline;

    let params = EvalParams::new(1, 100, "tokenizer.json");
    assert!(matches!(
        Wikitext::V2.init(&params, &offline()),
        Err(TaskError::Configuration(_))
    ));
}

#[test]
fn test_invalid_utf8() {
    use crate::source::test_utils::{FakeFetch, sources};

    let dir = tempfile::tempdir().unwrap();
    let mut params = EvalParams::new(4, 100, "tokenizer.json");
    params.cache_dir = dir.path().into();

    let mut fetch = FakeFetch::default();
    fetch.files.insert(
        WikitextVersion::V2.url().into(),
        archive("wikitext-2-raw/wiki.test.raw", b"a \xff\xfe b"),
    );
    let err = Wikitext::V2.init(&params, &sources(fetch)).err().unwrap();
    assert!(matches!(err, TaskError::SourceUnavailable(_)));
    assert!(err.to_string().contains("wiki.test.raw"));
    assert!(!Wikitext::V2.cache_path(&params).exists());
}
