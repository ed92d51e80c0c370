//! S3 session
//!
//! The root lists buckets, `/bucket` is a container and everything below it
//! is an object key. Directories are common prefixes, materialized as empty
//! `key/` placeholder objects when created explicitly. Objects can only be
//! replaced as a whole, so ranged writes are buffered and spliced into the
//! existing object on close.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::operation::copy_object::builders::CopyObjectFluentBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete as DeleteRequest, MetadataDirective, ObjectIdentifier};
use bytes::Bytes;
use futures::FutureExt;
use jiff::Timestamp;
use tokio::io::{AsyncRead, ReadBuf};

use ferry_core::feature::{
    self, Append, AttributesFinder, Delete, Directory, Find, Read, ReadStream, Touch, Write,
    WriteStream,
};
use ferry_core::io::{BufferedWriteStream, splice};
use ferry_core::mapping::{ExceptionMappingService, into_io_error};
use ferry_core::{
    AttributedList, Error, ListService, Path, PathAttributes, PathCache, PathType, Protocol,
    Result, Session, TransferStatus,
};

use crate::mapping::S3ExceptionMappingService;

/// Connection settings for an S3 compatible endpoint
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`
    pub path_style: bool,
}

impl S3Config {
    pub fn new(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            region: "us-east-1".to_string(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            path_style: true,
        }
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }
}

/// Bucket and key of a path, `None` for the root
pub(crate) fn split(path: &Path) -> Option<(&str, &str)> {
    let trimmed = path.absolute().trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.split_once('/').unwrap_or((trimmed, "")))
}

fn object(path: &Path) -> Result<(&str, &str)> {
    match split(path) {
        Some((bucket, key)) if !key.is_empty() => Ok((bucket, key)),
        _ => Err(Error::unknown(format!("{path} is not an object"))),
    }
}

/// Listing prefix of a directory key, empty at the bucket root
pub(crate) fn prefix(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{key}/")
    }
}

pub(crate) fn content_type(key: &str) -> String {
    mime_guess::from_path(key).first_or_octet_stream().to_string()
}

/// URL-encoded `bucket/key` copy source
pub(crate) fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", urlencoding::encode(bucket), urlencoding::encode(key))
}

fn timestamp(dt: &aws_smithy_types::DateTime) -> Option<Timestamp> {
    Timestamp::from_second(dt.secs()).ok()
}

fn etag(tag: Option<&str>) -> Option<String> {
    tag.map(|t| t.trim_matches('"').to_string())
}

async fn fetch(client: &Client, bucket: &str, key: &str) -> Result<Bytes> {
    let response = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| S3ExceptionMappingService.map_with("Download failed", e))?;
    let body = response
        .body
        .collect()
        .await
        .map_err(|e| S3ExceptionMappingService.map_with("Download failed", e))?;
    Ok(body.into_bytes())
}

/// Copy of an object onto itself, which gives it a new modification time
fn refresh(client: &Client, bucket: &str, key: &str) -> CopyObjectFluentBuilder {
    client
        .copy_object()
        .copy_source(copy_source(bucket, key))
        .bucket(bucket)
        .key(key)
        .metadata_directive(MetadataDirective::Replace)
        .content_type(content_type(key))
}

async fn put(client: &Client, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
    let size = data.len();
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .content_type(content_type(key))
        .body(ByteStream::from(data))
        .send()
        .await
        .map_err(|e| S3ExceptionMappingService.map_with("Upload failed", e))?;
    tracing::debug!(bucket, key, size, "Put object");
    Ok(())
}

/// Object body whose transport failures surface as connection errors
struct BodyReader<R> {
    inner: Pin<Box<R>>,
}

impl<R> BodyReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

fn body_error(failure: std::io::Error) -> std::io::Error {
    into_io_error(
        Error::connection(format!("Reading object body failed: {failure}")).with_cause(failure),
    )
}

impl<R: AsyncRead> AsyncRead for BodyReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.get_mut().inner.as_mut().poll_read(cx, buf).map_err(body_error)
    }
}

struct S3Lister {
    client: Client,
}

impl S3Lister {
    async fn buckets(&self) -> Result<AttributedList> {
        let response = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| S3ExceptionMappingService.map_with("Listing directory failed", e))?;
        Ok(response
            .buckets()
            .iter()
            .filter_map(|b| {
                let name = b.name()?;
                let attributes = PathAttributes {
                    modified: b.creation_date().and_then(timestamp),
                    ..Default::default()
                };
                Some(Path::directory(format!("/{name}")).with_attributes(attributes))
            })
            .collect())
    }

    async fn objects(&self, directory: &Path, bucket: &str, key: &str) -> Result<AttributedList> {
        let prefix = prefix(key);
        let mut items = Vec::new();
        let mut placeholder = false;
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .delimiter("/")
                .prefix(&prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| S3ExceptionMappingService.map_with("Listing directory failed", e))?;

            for common in response.common_prefixes() {
                if let Some(name) = common
                    .prefix()
                    .and_then(|p| p.strip_prefix(prefix.as_str()))
                    .map(|p| p.trim_end_matches('/'))
                    .filter(|p| !p.is_empty())
                {
                    items.push(directory.child(name, PathType::Directory));
                }
            }
            for object in response.contents() {
                let Some(name) = object.key().and_then(|k| k.strip_prefix(prefix.as_str())) else {
                    continue;
                };
                if name.is_empty() {
                    placeholder = true;
                    continue;
                }
                let attributes = PathAttributes {
                    size: object.size().map(|s| s.max(0) as u64),
                    modified: object.last_modified().and_then(timestamp),
                    etag: etag(object.e_tag()),
                    ..Default::default()
                };
                items.push(directory.child(name, PathType::File).with_attributes(attributes));
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        // A prefix with neither children nor placeholder does not exist
        if items.is_empty() && !placeholder && !key.is_empty() {
            return Err(Error::not_found(directory.absolute()));
        }
        Ok(AttributedList::new(items))
    }
}

#[async_trait]
impl ListService for S3Lister {
    async fn list(&self, directory: &Path) -> Result<AttributedList> {
        let listing = match split(directory) {
            None => self.buckets().await?,
            Some((bucket, key)) => self.objects(directory, bucket, key).await?,
        };
        tracing::debug!(directory = %directory, entries = listing.len(), "Listed S3 directory");
        Ok(listing)
    }
}

/// Session over an S3 compatible endpoint
pub struct S3Session {
    client: Client,
    cache: Arc<PathCache>,
    lister: S3Lister,
}

impl S3Session {
    /// Connect with static credentials
    pub async fn connect(config: &S3Config) -> Result<Self> {
        let credentials = aws_credential_types::Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "ferry-static-credentials",
        );

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(aws_config::Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.path_style)
            .build();

        tracing::debug!(endpoint = %config.endpoint, region = %config.region, "Connected S3 session");
        Ok(Self::new(Client::from_conf(s3_config)))
    }

    /// Session over an already configured client
    pub fn new(client: Client) -> Self {
        Self {
            lister: S3Lister {
                client: client.clone(),
            },
            client,
            cache: Arc::new(PathCache::new()),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<PathAttributes> {
        let response = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| S3ExceptionMappingService.map(e))?;
        Ok(PathAttributes {
            size: response.content_length().map(|s| s.max(0) as u64),
            modified: response.last_modified().and_then(timestamp),
            etag: etag(response.e_tag()),
            ..Default::default()
        })
    }

    /// Every key at or below a directory prefix
    async fn keys_below(&self, bucket: &str, key: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix(key));
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| S3ExceptionMappingService.map_with("Cannot delete", e))?;
            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|o| o.key().map(str::to_string)),
            );
            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        Ok(keys)
    }

    async fn delete_keys(&self, bucket: &str, keys: Vec<String>) -> Result<()> {
        // DeleteObjects accepts at most 1000 keys per request
        for batch in keys.chunks(1000) {
            let objects = batch
                .iter()
                .map(|k| ObjectIdentifier::builder().key(k).build())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::unknown(e.to_string()).with_cause(e))?;
            let delete = DeleteRequest::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| Error::unknown(e.to_string()).with_cause(e))?;
            let response = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| S3ExceptionMappingService.map_with("Cannot delete", e))?;
            if let Some(failed) = response.errors().first() {
                let code = failed.code();
                return Err(Error::new(
                    S3ExceptionMappingService::category(code, None),
                    format!(
                        "{}: {}",
                        failed.key().unwrap_or_default(),
                        failed.message().unwrap_or_default()
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Session for S3Session {
    fn protocol(&self) -> Protocol {
        Protocol::S3
    }

    fn cache(&self) -> &PathCache {
        &self.cache
    }

    fn list_service(&self) -> &dyn ListService {
        &self.lister
    }

    fn reader(&self) -> Option<&dyn Read> {
        Some(self)
    }

    fn writer(&self) -> Option<&dyn Write> {
        Some(self)
    }

    fn deleter(&self) -> Option<&dyn Delete> {
        Some(self)
    }

    fn toucher(&self) -> Option<&dyn Touch> {
        Some(self)
    }

    fn finder(&self) -> Option<&dyn Find> {
        Some(self)
    }

    fn attributes_finder(&self) -> Option<&dyn AttributesFinder> {
        Some(self)
    }

    fn server_copy(&self) -> Option<&dyn feature::Copy> {
        Some(self)
    }

    fn directories(&self) -> Option<&dyn Directory> {
        Some(self)
    }
}

#[async_trait]
impl Read for S3Session {
    async fn read(&self, file: &Path, status: &TransferStatus) -> Result<ReadStream> {
        let (bucket, key) = object(file)?;
        let start = status.read_position();
        if (start > 0 || status.length > 0)
            && let Some(size) = self.head(bucket, key).await?.size
        {
            status.check_range(file, size)?;
            // A range starting at the size is unsatisfiable for S3
            if start == size {
                return Ok(Box::pin(tokio::io::empty()));
            }
        }
        let mut request = self.client.get_object().bucket(bucket).key(key);
        if start > 0 {
            request = request.range(format!("bytes={start}-"));
        }
        let response = request
            .send()
            .await
            .map_err(|e| S3ExceptionMappingService.map_with("Download failed", e))?;
        tracing::debug!(path = %file, offset = start, "Open S3 read");
        Ok(Box::pin(BodyReader::new(response.body.into_async_read())))
    }
}

#[async_trait]
impl Write for S3Session {
    async fn write(&self, file: &Path, status: &TransferStatus) -> Result<WriteStream> {
        let (bucket, key) = object(file)?;
        let position = status.write_position();
        if status.append {
            let size = self.head(bucket, key).await?.size.unwrap_or_default();
            if size < position {
                return Err(Error::interrupted(format!(
                    "{file} holds {size} bytes, cannot append at {position}"
                )));
            }
        }

        let client = self.client.clone();
        let cache = self.cache.clone();
        let path = file.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        let append = status.append;
        Ok(Box::pin(BufferedWriteStream::new(Box::new(move |bytes: Vec<u8>| {
            async move {
                let data = if append {
                    let existing = fetch(&client, &bucket, &key).await?;
                    if (existing.len() as u64) < position {
                        return Err(Error::interrupted(format!(
                            "{path} holds {} bytes, cannot append at {position}",
                            existing.len()
                        )));
                    }
                    splice(&existing, position as usize, &bytes)
                } else {
                    bytes
                };
                put(&client, &bucket, &key, data).await?;
                cache.invalidate_structure(&path);
                Ok::<_, Error>(())
            }
            .boxed()
        }))))
    }

    async fn append(&self, file: &Path) -> Result<Append> {
        let (bucket, key) = object(file)?;
        match self.head(bucket, key).await {
            Ok(attributes) => Ok(Append::existing(attributes.size.unwrap_or_default())),
            Err(e) if e.is_not_found() => Ok(Append::none()),
            Err(e) => Err(e),
        }
    }

    fn random_access(&self) -> bool {
        false
    }
}

#[async_trait]
impl Delete for S3Session {
    async fn delete(&self, files: &[Path]) -> Result<()> {
        for file in files {
            let Some((bucket, key)) = split(file) else {
                return Err(Error::access_denied("Cannot delete the root"));
            };
            if key.is_empty() {
                let keys = self.keys_below(bucket, key).await?;
                self.delete_keys(bucket, keys).await?;
                self.client
                    .delete_bucket()
                    .bucket(bucket)
                    .send()
                    .await
                    .map_err(|e| S3ExceptionMappingService.map_with("Cannot delete", e))?;
            } else if file.is_directory() {
                let keys = self.keys_below(bucket, key).await?;
                self.delete_keys(bucket, keys).await?;
            } else {
                self.client
                    .delete_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| S3ExceptionMappingService.map_with("Cannot delete", e))?;
            }
            tracing::debug!(path = %file, "Deleted");
            self.cache.invalidate_structure(file);
        }
        Ok(())
    }
}

#[async_trait]
impl Touch for S3Session {
    async fn touch(&self, file: &Path) -> Result<()> {
        let (bucket, key) = object(file)?;
        match self.head(bucket, key).await {
            // Existing content is kept
            Ok(_) => {
                refresh(&self.client, bucket, key)
                    .send()
                    .await
                    .map_err(|e| S3ExceptionMappingService.map_with("Cannot touch", e))?;
                tracing::debug!(path = %file, "Refreshed object");
            }
            Err(e) if e.is_not_found() => put(&self.client, bucket, key, Vec::new()).await?,
            Err(e) => return Err(e),
        }
        self.cache.invalidate_structure(file);
        Ok(())
    }
}

#[async_trait]
impl Find for S3Session {
    async fn find(&self, file: &Path) -> Result<bool> {
        let Some((bucket, key)) = split(file) else {
            return Ok(true);
        };
        if key.is_empty() {
            return match self.client.head_bucket().bucket(bucket).send().await {
                Ok(_) => Ok(true),
                Err(e) => match S3ExceptionMappingService.map(e) {
                    e if e.is_not_found() => Ok(false),
                    e => Err(e),
                },
            };
        }
        if file.is_directory() {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix(key))
                .max_keys(1)
                .send()
                .await
                .map_err(|e| S3ExceptionMappingService.map(e))?;
            return Ok(response.key_count().unwrap_or_default() > 0);
        }
        match self.head(bucket, key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl AttributesFinder for S3Session {
    async fn find(&self, file: &Path) -> Result<PathAttributes> {
        if file.is_directory() {
            return if Find::find(self, file).await? {
                Ok(PathAttributes::default())
            } else {
                Err(Error::not_found(file.absolute()))
            };
        }
        let (bucket, key) = object(file)?;
        self.head(bucket, key).await
    }
}

#[async_trait]
impl feature::Copy for S3Session {
    async fn copy(&self, source: &Path, target: &Path, _status: &TransferStatus) -> Result<()> {
        let (source_bucket, source_key) = object(source)?;
        let (bucket, key) = object(target)?;
        self.client
            .copy_object()
            .copy_source(copy_source(source_bucket, source_key))
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| S3ExceptionMappingService.map_with("Cannot copy", e))?;
        tracing::debug!(source = %source, target = %target, "Copied object");
        self.cache.invalidate_structure(target);
        Ok(())
    }
}

#[async_trait]
impl Directory for S3Session {
    async fn mkdir(&self, folder: &Path) -> Result<Path> {
        let Some((bucket, key)) = split(folder) else {
            return Ok(Path::root());
        };
        if key.is_empty() {
            self.client
                .create_bucket()
                .bucket(bucket)
                .send()
                .await
                .map_err(|e| S3ExceptionMappingService.map_with("Cannot create folder", e))?;
        } else {
            put(&self.client, bucket, &prefix(key), Vec::new()).await?;
        }
        if let Some(parent) = folder.parent() {
            self.cache.invalidate(&parent.reference());
        }
        Ok(Path::directory(folder.absolute()))
    }
}
