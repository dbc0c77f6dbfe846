//! Document collaborators: fetching schema documents by URI and turning
//! bytes into generic documents and back.
//!
//! The resolver and the object manager only see the [`DocumentFetcher`] and
//! [`DocumentCodec`] traits; the implementations here cover files, in-memory
//! maps and (with the `remote` feature) HTTP.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use url::Url;

use crate::error::{FetchError, ParseError, SerializeError};

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Parses raw bytes into a generic document and serializes it back.
pub trait DocumentCodec: Send + Sync {
    fn parse_document(&self, bytes: &[u8]) -> Result<Value, ParseError>;

    fn serialize_document(&self, document: &Value) -> Result<Vec<u8>, SerializeError>;

    /// File extension for documents in this format, without the dot.
    fn extension(&self) -> &'static str {
        "json"
    }
}

/// JSON codec. Pretty output is the default so saved files diff cleanly.
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    pub pretty: bool,
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl DocumentCodec for JsonCodec {
    fn parse_document(&self, bytes: &[u8]) -> Result<Value, ParseError> {
        serde_json::from_slice(bytes).map_err(|source| ParseError::Json { source })
    }

    fn serialize_document(&self, document: &Value) -> Result<Vec<u8>, SerializeError> {
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(document)
        } else {
            serde_json::to_vec(document)
        };
        encoded.map_err(|source| SerializeError::Json { source })
    }
}

/// YAML codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlCodec;

impl DocumentCodec for YamlCodec {
    fn parse_document(&self, bytes: &[u8]) -> Result<Value, ParseError> {
        serde_yaml::from_slice(bytes).map_err(|source| ParseError::Yaml { source })
    }

    fn serialize_document(&self, document: &Value) -> Result<Vec<u8>, SerializeError> {
        serde_yaml::to_string(document)
            .map(String::into_bytes)
            .map_err(|source| SerializeError::Yaml { source })
    }

    fn extension(&self) -> &'static str {
        "yaml"
    }
}

/// Pick a codec from a file name: `.yaml`/`.yml` is YAML, anything else JSON.
pub fn codec_for_path(path: &str) -> Box<dyn DocumentCodec> {
    if is_yaml_path(path) {
        Box::new(YamlCodec)
    } else {
        Box::new(JsonCodec::default())
    }
}

fn is_yaml_path(path: &str) -> bool {
    path.ends_with(".yaml") || path.ends_with(".yml")
}

/// Resolves an external schema document by URI.
pub trait DocumentFetcher: Send + Sync {
    fn fetch_document(&self, uri: &Url) -> Result<Value, FetchError>;
}

/// Serves documents from an in-memory map keyed by URI (without fragment).
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    documents: HashMap<String, Value>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document under `uri`.
    pub fn with_document(mut self, uri: impl Into<String>, document: Value) -> Self {
        self.documents.insert(uri.into(), document);
        self
    }

    pub fn insert(&mut self, uri: impl Into<String>, document: Value) {
        self.documents.insert(uri.into(), document);
    }
}

impl DocumentFetcher for MemoryFetcher {
    fn fetch_document(&self, uri: &Url) -> Result<Value, FetchError> {
        let mut key = uri.clone();
        key.set_fragment(None);
        self.documents
            .get(key.as_str())
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                uri: key.to_string(),
            })
    }
}

/// Serves `file://` URIs from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl DocumentFetcher for FileFetcher {
    fn fetch_document(&self, uri: &Url) -> Result<Value, FetchError> {
        if uri.scheme() != "file" {
            return Err(FetchError::UnsupportedScheme {
                uri: uri.to_string(),
                scheme: uri.scheme().to_string(),
            });
        }
        let path = uri.to_file_path().map_err(|()| FetchError::NotFound {
            uri: uri.to_string(),
        })?;
        load_document(&path).map_err(|e| match e {
            FetchError::Parse { source, .. } => FetchError::Parse {
                uri: uri.to_string(),
                source,
            },
            other => other,
        })
    }
}

/// Serves `http://` and `https://` URIs.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "remote")]
impl HttpFetcher {
    /// Build a fetcher with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Network` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|source| FetchError::Network {
                uri: String::new(),
                source,
            })?;
        Ok(Self { client })
    }
}

#[cfg(feature = "remote")]
impl DocumentFetcher for HttpFetcher {
    fn fetch_document(&self, uri: &Url) -> Result<Value, FetchError> {
        let mut target = uri.clone();
        target.set_fragment(None);

        let response = self
            .client
            .get(target.as_str())
            .send()
            .map_err(|source| FetchError::Network {
                uri: target.to_string(),
                source,
            })?;

        // Check for HTTP errors before parsing
        let response = response
            .error_for_status()
            .map_err(|source| FetchError::Network {
                uri: target.to_string(),
                source,
            })?;

        let bytes = response.bytes().map_err(|source| FetchError::Network {
            uri: target.to_string(),
            source,
        })?;

        codec_for_path(target.path())
            .parse_document(&bytes)
            .map_err(|source| FetchError::Parse {
                uri: target.to_string(),
                source,
            })
    }
}

/// Dispatches on the URI scheme: `file` to [`FileFetcher`], `http(s)` to
/// [`HttpFetcher`] when the `remote` feature is on, and anything else to
/// an optional in-memory fallback.
#[derive(Debug, Default)]
pub struct DefaultFetcher {
    memory: MemoryFetcher,
    #[cfg(feature = "remote")]
    http: Option<HttpFetcher>,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents served before any scheme-based lookup.
    pub fn with_memory(mut self, memory: MemoryFetcher) -> Self {
        self.memory = memory;
        self
    }
}

impl DocumentFetcher for DefaultFetcher {
    fn fetch_document(&self, uri: &Url) -> Result<Value, FetchError> {
        match self.memory.fetch_document(uri) {
            Ok(doc) => return Ok(doc),
            Err(FetchError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        match uri.scheme() {
            "file" => FileFetcher.fetch_document(uri),
            #[cfg(feature = "remote")]
            "http" | "https" => match &self.http {
                Some(http) => http.fetch_document(uri),
                None => HttpFetcher::new()?.fetch_document(uri),
            },
            scheme => Err(FetchError::UnsupportedScheme {
                uri: uri.to_string(),
                scheme: scheme.to_string(),
            }),
        }
    }
}

/// Load a document from a file path, choosing the codec by extension.
///
/// # Errors
///
/// Returns `FetchError::NotFound` if the file doesn't exist,
/// or `FetchError::Parse` if the content doesn't parse.
pub fn load_document(path: &Path) -> Result<Value, FetchError> {
    if !path.exists() {
        return Err(FetchError::NotFound {
            uri: path.display().to_string(),
        });
    }

    let bytes = std::fs::read(path).map_err(|source| FetchError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    codec_for_path(&path.to_string_lossy())
        .parse_document(&bytes)
        .map_err(|source| FetchError::Parse {
            uri: path.display().to_string(),
            source,
        })
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Turn a CLI-style source (URL, `file:` URI or path) into an absolute URI.
///
/// Relative paths are made absolute against the current directory.
pub fn source_uri(source: &str) -> Result<Url, String> {
    if is_url(source) || source.starts_with("file:") {
        return Url::parse(source).map_err(|e| e.to_string());
    }
    let path = Path::new(source);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| e.to_string())?
            .join(path)
    };
    Url::from_file_path(&absolute)
        .map_err(|()| format!("cannot express {} as a file URI", absolute.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    #[test]
    fn load_document_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type": "object"}}"#).unwrap();

        let doc = load_document(file.path()).unwrap();
        assert_eq!(doc["type"], "object");
    }

    #[test]
    fn load_document_yaml_file() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "type: object\nrequired: [name]").unwrap();

        let doc = load_document(file.path()).unwrap();
        assert_eq!(doc["type"], "object");
        assert_eq!(doc["required"], json!(["name"]));
    }

    #[test]
    fn load_document_not_found() {
        let result = load_document(Path::new("/nonexistent/path.json"));
        assert!(matches!(result, Err(FetchError::NotFound { .. })));
    }

    #[test]
    fn load_document_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();

        let result = load_document(file.path());
        assert!(matches!(result, Err(FetchError::Parse { .. })));
    }

    #[test]
    fn json_codec_round_trips_preserving_order() {
        let codec = JsonCodec { pretty: false };
        let doc = json!({"z": 1, "a": 2});
        let bytes = codec.serialize_document(&doc).unwrap();
        assert_eq!(String::from_utf8(bytes.clone()).unwrap(), r#"{"z":1,"a":2}"#);
        assert_eq!(codec.parse_document(&bytes).unwrap(), doc);
    }

    #[test]
    fn yaml_codec_rejects_garbage() {
        let result = YamlCodec.parse_document(b"key: [unclosed");
        assert!(matches!(result, Err(ParseError::Yaml { .. })));
    }

    #[test]
    fn memory_fetcher_ignores_fragment() {
        let fetcher =
            MemoryFetcher::new().with_document("https://example.com/a.json", json!({"type": "string"}));
        let uri = Url::parse("https://example.com/a.json#/definitions/x").unwrap();
        assert_eq!(fetcher.fetch_document(&uri).unwrap()["type"], "string");

        let missing = Url::parse("https://example.com/b.json").unwrap();
        assert!(matches!(
            fetcher.fetch_document(&missing),
            Err(FetchError::NotFound { .. })
        ));
    }

    #[test]
    fn file_fetcher_rejects_other_schemes() {
        let uri = Url::parse("https://example.com/a.json").unwrap();
        assert!(matches!(
            FileFetcher.fetch_document(&uri),
            Err(FetchError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn file_fetcher_reads_file_uri() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type": "integer"}}"#).unwrap();
        let uri = Url::from_file_path(file.path()).unwrap();
        assert_eq!(FileFetcher.fetch_document(&uri).unwrap()["type"], "integer");
    }

    #[test]
    fn source_uri_handles_paths_and_urls() {
        let uri = source_uri("https://example.com/s.json").unwrap();
        assert_eq!(uri.scheme(), "https");

        let uri = source_uri("/tmp/schema.json").unwrap();
        assert_eq!(uri.scheme(), "file");
        assert!(uri.path().ends_with("/tmp/schema.json"));

        let uri = source_uri("relative/schema.json").unwrap();
        assert!(uri.path().ends_with("relative/schema.json"));
    }

    #[test]
    fn is_url_detection() {
        assert!(is_url("https://example.com/schema.json"));
        assert!(is_url("http://example.com/schema.json"));
        assert!(!is_url("./schema.json"));
    }

    #[cfg(feature = "remote")]
    mod remote {
        use super::*;

        #[test]
        fn http_fetcher_parses_json_body() {
            let mut server = mockito::Server::new();
            let mock = server
                .mock("GET", "/schemas/person.json")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(r#"{"type": "object", "title": "Person"}"#)
                .create();

            let uri = Url::parse(&format!("{}/schemas/person.json#/x", server.url())).unwrap();
            let doc = HttpFetcher::new().unwrap().fetch_document(&uri).unwrap();
            assert_eq!(doc["title"], "Person");
            mock.assert();
        }

        #[test]
        fn http_fetcher_reports_status_errors() {
            let mut server = mockito::Server::new();
            let _mock = server.mock("GET", "/missing.json").with_status(404).create();

            let uri = Url::parse(&format!("{}/missing.json", server.url())).unwrap();
            let result = HttpFetcher::new().unwrap().fetch_document(&uri);
            assert!(matches!(result, Err(FetchError::Network { .. })));
        }
    }
}
