use std::convert::Infallible;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use base64::Engine;
use tracing::debug;
use url::{Host, Url};

use crate::error::VisionError;

/// Largest local image accepted by the API.
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// An image to send: a local file or a remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Path(PathBuf),
    Url(String),
}

impl ImageReference {
    /// Classifies a source string. Anything with a `scheme://` prefix is a URL.
    pub fn parse(source: &str) -> Self {
        if source.contains("://") {
            ImageReference::Url(source.to_string())
        } else {
            ImageReference::Path(PathBuf::from(source))
        }
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        ImageReference::Path(path.into())
    }

    pub fn url(url: impl Into<String>) -> Self {
        ImageReference::Url(url.into())
    }
}

impl FromStr for ImageReference {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageReference::Path(path) => write!(f, "{}", path.display()),
            ImageReference::Url(url) => f.write_str(url),
        }
    }
}

/// Image formats the API accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl ImageFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "webp" => Some(ImageFormat::Webp),
            "gif" => Some(ImageFormat::Gif),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Gif => "image/gif",
        }
    }
}

/// Base64-encoded image bytes with their format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub format: ImageFormat,
    pub data: String,
}

impl EncodedImage {
    pub fn from_bytes(format: ImageFormat, bytes: &[u8]) -> Self {
        Self {
            format,
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// Renders the image as a `data:` URL.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), self.data)
    }
}

/// An image that passed local validation and is ready to be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedImage {
    Remote(Url),
    Embedded(EncodedImage),
}

impl ResolvedImage {
    /// The value for the request's `image_url.url` field.
    pub fn wire_url(&self) -> String {
        match self {
            ResolvedImage::Remote(url) => url.to_string(),
            ResolvedImage::Embedded(image) => image.data_url(),
        }
    }
}

/// Local limits applied to images before anything is sent.
#[derive(Debug, Clone)]
pub struct InputPolicy {
    pub max_bytes: u64,
    /// Directory local files must stay within. Relative paths are taken
    /// relative to it.
    pub allowed_root: Option<PathBuf>,
}

impl Default for InputPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
            allowed_root: None,
        }
    }
}

impl InputPolicy {
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.allowed_root = Some(root.into());
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Validates an image reference and, for local files, reads and encodes it.
    pub fn resolve(&self, image: &ImageReference) -> Result<ResolvedImage, VisionError> {
        match image {
            ImageReference::Url(raw) => validate_url(raw).map(ResolvedImage::Remote),
            ImageReference::Path(path) => self.load_file(path).map(ResolvedImage::Embedded),
        }
    }

    fn load_file(&self, path: &Path) -> Result<EncodedImage, VisionError> {
        let path = self.confine(path)?;

        let format = ImageFormat::from_path(&path).ok_or_else(|| {
            VisionError::invalid(format!(
                "unsupported image format: {} (expected png, jpeg, webp or gif)",
                path.display()
            ))
        })?;

        let metadata = std::fs::metadata(&path).map_err(|e| {
            VisionError::invalid(format!("cannot access {}: {}", path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(VisionError::invalid(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        if metadata.len() > self.max_bytes {
            return Err(VisionError::invalid(format!(
                "{} is {} bytes, limit is {} bytes",
                path.display(),
                metadata.len(),
                self.max_bytes
            )));
        }

        // The file may grow between the metadata check and the read.
        let bytes = File::open(&path)
            .and_then(|file| read_bounded(file, self.max_bytes))
            .map_err(|e| {
                VisionError::invalid(format!("cannot read {}: {}", path.display(), e))
            })?
            .ok_or_else(|| {
                VisionError::invalid(format!(
                    "{} exceeds the limit of {} bytes",
                    path.display(),
                    self.max_bytes
                ))
            })?;
        debug!(path = %path.display(), bytes = bytes.len(), mime = format.mime_type(), "Encoding local image");

        Ok(EncodedImage::from_bytes(format, &bytes))
    }

    /// Rejects paths that leave the allowed root, returning the path to open.
    fn confine(&self, path: &Path) -> Result<PathBuf, VisionError> {
        let Some(root) = &self.allowed_root else {
            if path.components().any(|c| c == Component::ParentDir) {
                return Err(VisionError::invalid(format!(
                    "path traversal is not allowed: {}",
                    path.display()
                )));
            }
            return Ok(path.to_path_buf());
        };

        let given_root = root.is_absolute().then(|| normalize_lexically(root));
        let root = root.canonicalize().map_err(|e| {
            VisionError::invalid(format!("allowed root {} is not accessible: {}", root.display(), e))
        })?;
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        };

        let escapes = || {
            VisionError::invalid(format!(
                "{} is outside the allowed directory {}",
                path.display(),
                root.display()
            ))
        };

        let lexical = normalize_lexically(&candidate);
        let inside_given = given_root.as_ref().is_some_and(|g| lexical.starts_with(g));
        if !lexical.starts_with(&root) && !inside_given {
            return Err(escapes());
        }

        // Symlinks can still point elsewhere.
        let resolved = candidate.canonicalize().map_err(|e| {
            VisionError::invalid(format!("cannot access {}: {}", path.display(), e))
        })?;
        if !resolved.starts_with(&root) {
            return Err(escapes());
        }

        Ok(resolved)
    }
}

/// Reads at most `max_bytes`, returning `None` if the source holds more.
fn read_bounded(reader: impl Read, max_bytes: u64) -> std::io::Result<Option<Vec<u8>>> {
    let mut bytes = Vec::new();
    reader.take(max_bytes.saturating_add(1)).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > max_bytes {
        return Ok(None);
    }
    Ok(Some(bytes))
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Checks a remote image URL before handing it to the service.
///
/// Only `http`/`https` URLs with a public-looking host pass. Hostnames are not
/// resolved, so this is a deterrent against obvious internal targets rather
/// than a complete SSRF defence.
pub fn validate_url(raw: &str) -> Result<Url, VisionError> {
    let url = Url::parse(raw)
        .map_err(|e| VisionError::invalid(format!("malformed URL {raw}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(VisionError::invalid(format!(
            "unsupported URL scheme '{}', expected http or https",
            url.scheme()
        )));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(VisionError::invalid("URLs with embedded credentials are not allowed"));
    }

    let host = url
        .host()
        .ok_or_else(|| VisionError::invalid(format!("URL has no host: {raw}")))?;

    let forbidden = match host {
        Host::Domain(domain) => is_internal_domain(domain),
        Host::Ipv4(ip) => is_internal_ip(IpAddr::V4(ip)),
        Host::Ipv6(ip) => is_internal_ip(IpAddr::V6(ip)),
    };
    if forbidden {
        return Err(VisionError::invalid(format!(
            "URL points at a local or internal host: {raw}"
        )));
    }

    Ok(url)
}

fn is_internal_domain(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    domain == "localhost"
        || !domain.contains('.')
        || [".localhost", ".local", ".internal"]
            .iter()
            .any(|suffix| domain.ends_with(suffix))
}

fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_ipv4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_internal_ipv4(v4),
            None => is_internal_ipv6(v6),
        },
    }
}

fn is_internal_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || a == 0
        // 100.64.0.0/10, carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_internal_ipv6(ip: Ipv6Addr) -> bool {
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_unique_local()
        || ip.is_unicast_link_local()
        || embedded_ipv4(ip).is_some_and(is_internal_ipv4)
}

/// IPv4 address carried inside a NAT64 (64:ff9b::/96) or 6to4 (2002::/16)
/// address.
fn embedded_ipv4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    let seg = ip.segments();
    let octets = ip.octets();
    if seg[..6] == [0x64u16, 0xff9b, 0, 0, 0, 0] {
        return Some(Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15]));
    }
    if seg[0] == 0x2002 {
        return Some(Ipv4Addr::new(octets[2], octets[3], octets[4], octets[5]));
    }
    None
}
