//! Test fixtures: in-memory zip archives and a throwaway HTTP server.

use async_zip::{Compression, ZipEntryBuilder, tokio::write::ZipFileWriter};
use axum::{Router, body::Body, http::StatusCode, response::IntoResponse, routing::get};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

struct FixtureEntry {
    name: String,
    data: Vec<u8>,
    declared_size: Option<u32>,
}

/// Builds uncompressed ("stored") zip archives in memory
#[derive(Default)]
pub struct ZipFixture {
    entries: Vec<FixtureEntry>,
}

impl ZipFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.entries.push(FixtureEntry {
            name: name.to_string(),
            data: data.to_vec(),
            declared_size: None,
        });
        self
    }

    pub fn dir(self, name: &str) -> Self {
        self.file(name, &[])
    }

    /// An entry that claims `declared_size` bytes but only stores `data`
    pub fn truncated_file(mut self, name: &str, data: &[u8], declared_size: u32) -> Self {
        self.entries.push(FixtureEntry {
            name: name.to_string(),
            data: data.to_vec(),
            declared_size: Some(declared_size),
        });
        self
    }

    pub async fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ZipFileWriter::with_tokio(Vec::new());
        for entry in &self.entries {
            let builder = ZipEntryBuilder::new(entry.name.clone().into(), Compression::Stored);
            writer.write_entry_whole(builder, &entry.data).await.unwrap();
        }
        let mut bytes = writer.close().await.unwrap().into_inner();

        for entry in &self.entries {
            if let Some(size) = entry.declared_size {
                set_uncompressed_size(&mut bytes, &entry.name, size);
            }
        }
        bytes
    }
}

const CENTRAL_HEADER_SIGNATURE: [u8; 4] = 0x02014b50u32.to_le_bytes();

/// Overwrite the uncompressed size of `name` in both its central directory
/// record and its local header
fn set_uncompressed_size(bytes: &mut [u8], name: &str, size: u32) {
    let name = name.as_bytes();
    let mut pos = 0;
    while pos + 46 <= bytes.len() {
        if bytes[pos..pos + 4] == CENTRAL_HEADER_SIGNATURE {
            let name_len = u16::from_le_bytes([bytes[pos + 28], bytes[pos + 29]]) as usize;
            if bytes.get(pos + 46..pos + 46 + name_len) == Some(name) {
                bytes[pos + 24..pos + 28].copy_from_slice(&size.to_le_bytes());
                let local = u32::from_le_bytes(bytes[pos + 42..pos + 46].try_into().unwrap()) as usize;
                bytes[local + 22..local + 26].copy_from_slice(&size.to_le_bytes());
                return;
            }
        }
        pos += 1;
    }
    panic!("no central directory record for {}", String::from_utf8_lossy(name));
}

/// Write `fixture` to `<dir>/fixture.zip`
pub async fn write_fixture(dir: &Path, fixture: &ZipFixture) -> PathBuf {
    let path = dir.join("fixture.zip");
    tokio::fs::write(&path, fixture.to_bytes().await).await.unwrap();
    path
}

/// Local HTTP server for downloader and manager tests.
///
/// Routes:
/// - `/pkg/{name}`: serves the archive registered under `name`
/// - `/chunked`: the first archive, streamed without a content length
/// - `/stall`: sends a few bytes, then never finishes
/// - anything else: 404
pub struct TestServer {
    addr: SocketAddr,
}

impl TestServer {
    pub async fn start(archives: Vec<(&str, Vec<u8>)>) -> Self {
        let mut router = Router::new();
        let first = archives.first().map(|(_, bytes)| bytes.clone()).unwrap_or_default();

        for (name, bytes) in archives {
            router = router.route(
                &format!("/pkg/{name}"),
                get(move || {
                    let bytes = bytes.clone();
                    async move { bytes }
                }),
            );
        }

        let router = router
            .route(
                "/chunked",
                get(move || {
                    let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
                        first.chunks(1000).map(|c| Ok(c.to_vec())).collect();
                    async move { Body::from_stream(futures::stream::iter(chunks)) }
                }),
            )
            .route("/stall", get(stalled_body))
            .fallback(|| async { StatusCode::NOT_FOUND });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, path)).unwrap()
    }
}

async fn stalled_body() -> impl IntoResponse {
    use futures::StreamExt;

    let head = futures::stream::iter(vec![Ok::<_, std::io::Error>(vec![0u8; 512])]);
    let tail = futures::stream::unfold((), |()| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Some((Ok::<_, std::io::Error>(vec![0u8; 1]), ()))
    });
    Body::from_stream(head.chain(tail))
}
