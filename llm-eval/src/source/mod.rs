//! token 数据的来源：远程语料、分词器与磁盘上的 JSON 缓存。

mod detok;
mod encoder;
mod fetch;

use crate::{EvalParams, Result, TaskError};
use memmap2::Mmap;
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

pub use detok::wikitext_detokenize;
pub use encoder::HfEncoder;
pub use fetch::HttpFetcher;

/// 按 url 取回原始字节。
pub trait Fetch {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// 把文本编码为 token id。
pub trait Encode {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
}

type LoadEncoder = dyn Fn(&Path) -> Result<Box<dyn Encode>>;

/// 任务创建缓存时使用的外部协作者。
pub struct Sources {
    fetch: Box<dyn Fetch>,
    load_encoder: Box<LoadEncoder>,
}

impl Sources {
    pub fn new(
        fetch: impl Fetch + 'static,
        load_encoder: impl Fn(&Path) -> Result<Box<dyn Encode>> + 'static,
    ) -> Self {
        Self {
            fetch: Box::new(fetch),
            load_encoder: Box::new(load_encoder),
        }
    }

    /// 通过 http 下载语料，用 `tokenizer_path` 处的分词器编码。
    pub fn remote() -> Result<Self> {
        Ok(Self::new(HttpFetcher::new()?, |path| {
            Ok(Box::new(HfEncoder::from_file(path)?) as Box<dyn Encode>)
        }))
    }

    pub fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        tracing::info!("fetching {url}");
        let bytes = self.fetch.fetch(url)?;
        tracing::info!("fetched {} bytes from {url}", bytes.len());
        Ok(bytes)
    }

    pub fn encoder(&self, params: &EvalParams) -> Result<Box<dyn Encode>> {
        (self.load_encoder)(&params.tokenizer_path)
    }
}

/// 缓存文件名带有分词器路径的摘要，更换分词器即令缓存失效。
pub fn cache_path(params: &EvalParams, name: &str) -> PathBuf {
    let digest = Sha256::digest(params.tokenizer_path.to_string_lossy().as_bytes());
    let hash = hex::encode(&digest[..16]);
    params.cache_dir.join(format!("{name}_{hash}.json"))
}

/// 读取 `path` 处的缓存；不存在时调用 `create` 生成并写入。
pub fn read_or_create<T>(path: &Path, create: impl FnOnce() -> Result<T>) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    if path.is_file() {
        tracing::info!("loading cached tokens from {}", path.display());
        return load(path);
    }

    tracing::info!("no cache at {}, creating", path.display());
    let data = create()?;
    store(path, &data)?;
    Ok(data)
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file) }?;
    serde_json::from_slice(&mmap).map_err(|source| TaskError::CacheCorruption {
        path: path.into(),
        source,
    })
}

fn store<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?
    }
    // 先写临时文件再改名，中断时不留下半截缓存
    let part = path.with_extension("json.part");
    let mut writer = BufWriter::new(File::create(&part)?);
    serde_json::to_writer(&mut writer, data)?;
    writer.flush()?;
    drop(writer);
    fs::rename(&part, path)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use std::{cell::RefCell, collections::HashMap, rc::Rc};

    /// 以空白切词，token id 为词长，便于手算。
    pub struct LenEncoder;

    impl Encode for LenEncoder {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.split_whitespace().map(|w| w.len() as u32).collect())
        }
    }

    /// 返回预置内容并记录请求过的 url。
    #[derive(Clone, Default)]
    pub struct FakeFetch {
        pub files: HashMap<String, Vec<u8>>,
        pub requests: Rc<RefCell<Vec<String>>>,
    }

    impl Fetch for FakeFetch {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.requests.borrow_mut().push(url.into());
            self.files
                .get(url)
                .cloned()
                .ok_or_else(|| TaskError::source(format!("{url}: 404")))
        }
    }

    pub fn sources(fetch: FakeFetch) -> Sources {
        Sources::new(fetch, |_| Ok(Box::new(LenEncoder) as Box<dyn Encode>))
    }

    pub fn offline() -> Sources {
        sources(FakeFetch::default())
    }
}

#[test]
fn test_cache_path() {
    let mut params = EvalParams::new(8, 100, "gpt2/tokenizer.json");
    params.cache_dir = "cache".into();
    let path = cache_path(&params, "lambada");
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(path.starts_with("cache"));
    assert!(name.starts_with("lambada_"));
    assert_eq!(name.len(), "lambada_".len() + 32 + ".json".len());
    assert_eq!(path, cache_path(&params, "lambada"));

    params.tokenizer_path = "other/tokenizer.json".into();
    assert_ne!(path, cache_path(&params, "lambada"));
}

#[test]
fn test_read_or_create() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sub").join("tokens.json");

    let data = read_or_create(&path, || Ok(vec![vec![1u32, 2], vec![3]])).unwrap();
    assert_eq!(data, [vec![1, 2], vec![3]]);
    assert!(path.is_file());
    assert!(!path.with_extension("json.part").exists());

    let cached = read_or_create::<Vec<Vec<u32>>>(&path, || unreachable!()).unwrap();
    assert_eq!(cached, data);
}

#[test]
fn test_create_failure_leaves_no_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokens.json");
    let result = read_or_create::<Vec<Vec<u32>>>(&path, || Err(TaskError::source("offline")));
    assert!(matches!(result, Err(TaskError::SourceUnavailable(_))));
    assert!(!path.exists());
}

#[test]
fn test_corrupt_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokens.json");

    fs::write(&path, r#"{"data": []}"#).unwrap();
    let result = read_or_create::<Vec<Vec<u32>>>(&path, || unreachable!());
    assert!(matches!(result, Err(TaskError::CacheCorruption { .. })));

    fs::write(&path, "").unwrap();
    let result = read_or_create::<Vec<Vec<u32>>>(&path, || unreachable!());
    assert!(matches!(result, Err(TaskError::CacheCorruption { .. })));
}
