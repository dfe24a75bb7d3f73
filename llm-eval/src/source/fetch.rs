use super::Fetch;
use crate::{Result, TaskError};
use reqwest::blocking::Client;

/// 阻塞式 http 下载，不重试。
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        // wikitext-103 的压缩包接近 200 MB，不设总超时
        let client = Client::builder()
            .timeout(None)
            .build()
            .map_err(|e| TaskError::source(format!("cannot build http client: {e}")))?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| TaskError::source(format!("{url}: {e}")))?;
        let bytes = response
            .bytes()
            .map_err(|e| TaskError::source(format!("{url}: {e}")))?;
        Ok(bytes.to_vec())
    }
}
