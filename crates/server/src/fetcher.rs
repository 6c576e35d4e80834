use image::RgbaImage;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use wplacer_engine::ChunkCache;
use wplacer_protocol::paths;

/// Read access to live canvas chunks. `None` reads as an empty chunk.
pub trait ChunkSource: Send + Sync + 'static {
    fn fetch(&self, chunk_x: i32, chunk_y: i32) -> impl Future<Output = Option<RgbaImage>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpChunkFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChunkFetcher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl ChunkSource for HttpChunkFetcher {
    async fn fetch(&self, chunk_x: i32, chunk_y: i32) -> Option<RgbaImage> {
        let url = paths::tile_url(&self.base_url, chunk_x, chunk_y);
        let resp = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                log::debug!("chunk {chunk_x},{chunk_y}: {e}");
                return None;
            }
        };
        if !resp.status().is_success() {
            log::debug!("chunk {chunk_x},{chunk_y}: status {}", resp.status());
            return None;
        }
        let bytes = match resp.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::debug!("chunk {chunk_x},{chunk_y}: {e}");
                return None;
            }
        };
        match image::load_from_memory(&bytes) {
            Ok(img) => Some(img.to_rgba8()),
            Err(e) => {
                log::debug!("chunk {chunk_x},{chunk_y}: decode failed: {e}");
                None
            }
        }
    }
}

/// Fetch every chunk concurrently and wait for all of them.
pub async fn fetch_all<C: ChunkSource>(source: &Arc<C>, chunks: &[(i32, i32)]) -> ChunkCache {
    let mut cache: ChunkCache = chunks.iter().map(|&c| (c, None)).collect();
    let mut set = JoinSet::new();
    for &(x, y) in chunks {
        let source = Arc::clone(source);
        set.spawn(async move { ((x, y), source.fetch(x, y).await) });
    }
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((key, bitmap)) => {
                cache.insert(key, bitmap);
            }
            Err(e) => log::warn!("chunk fetch task failed: {e}"),
        }
    }
    cache
}
