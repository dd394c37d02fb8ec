use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use std::env;

use crate::types::{bytes_stream, collect_stream, join_path, normalize_path};
use crate::{
    BlobStore, ByteStream, ChunkError, ChunkResult, StoreCapabilities, StoreOptions, Visibility,
};

/// Connection settings for an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Key prefix every path is stored under
    pub prefix: String,
    /// Required by most self-hosted S3 implementations
    pub force_path_style: bool,
}

impl S3Config {
    /// Read `<prefix>_BUCKET`, `<prefix>_REGION` and the optional
    /// `<prefix>_ENDPOINT_URL`, `<prefix>_ACCESS_KEY_ID`,
    /// `<prefix>_SECRET_ACCESS_KEY`, `<prefix>_KEY_PREFIX`
    pub fn from_env(prefix: &str) -> ChunkResult<Self> {
        let required = |name: &str| {
            let key = format!("{}_{}", prefix, name);
            env::var(&key).map_err(|_| {
                ChunkError::configuration(format!("{} environment variable required", key))
            })
        };
        let optional = |name: &str| env::var(format!("{}_{}", prefix, name)).ok();

        let endpoint_url = optional("ENDPOINT_URL");
        Ok(Self {
            bucket: required("BUCKET")?,
            region: required("REGION")?,
            force_path_style: endpoint_url.is_some(),
            endpoint_url,
            access_key_id: optional("ACCESS_KEY_ID"),
            secret_access_key: optional("SECRET_ACCESS_KEY"),
            prefix: optional("KEY_PREFIX").map(|p| normalize_path(&p)).unwrap_or_default(),
        })
    }
}

/// Blob store backed by any S3-compatible object storage.
///
/// Object storage has no append primitive, so `concatenate` is not offered and
/// merges stream chunks into the destination one after another.
#[derive(Clone)]
pub struct S3CompatibleStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3CompatibleStore {
    pub async fn connect(config: S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                id.clone(),
                secret.clone(),
                None,
                None,
                "dog-chunks",
            ));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }

        let shared = loader.load().await;
        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&shared)
                .force_path_style(config.force_path_style)
                .build(),
        );

        Self::from_client(client, config.bucket, config.prefix)
    }

    pub fn from_client<B: Into<String>, P: Into<String>>(
        client: Client,
        bucket: B,
        prefix: P,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: normalize_path(&prefix.into()),
        }
    }

    fn key(&self, path: &str) -> String {
        join_path(&self.prefix, path)
    }

    fn path_from_key(&self, key: &str) -> String {
        let key = normalize_path(key);
        if self.prefix.is_empty() {
            return key;
        }
        key.strip_prefix(&format!("{}/", self.prefix))
            .map(str::to_string)
            .unwrap_or(key)
    }

    /// Listing prefix for the "directory" at `path`
    fn dir_prefix(&self, path: &str) -> String {
        let key = self.key(path);
        if key.is_empty() {
            key
        } else {
            format!("{}/", key)
        }
    }

    /// Objects and common prefixes directly below `path`
    async fn list_level(&self, path: &str) -> ChunkResult<(Vec<String>, Vec<String>)> {
        let prefix = self.dir_prefix(path);
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/")
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(ChunkError::backend)?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    // directory marker objects end with '/'
                    if !key.ends_with('/') {
                        files.push(self.path_from_key(key));
                    }
                }
            }
            for common in output.common_prefixes() {
                if let Some(dir) = common.prefix() {
                    dirs.push(self.path_from_key(dir));
                }
            }

            match (output.is_truncated(), output.next_continuation_token()) {
                (Some(true), Some(next)) => token = Some(next.to_string()),
                _ => break,
            }
        }

        files.sort();
        dirs.sort();
        Ok((files, dirs))
    }

    /// Every object key below `path`, recursively
    async fn list_recursive(&self, path: &str) -> ChunkResult<Vec<String>> {
        let prefix = self.dir_prefix(path);
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(ChunkError::backend)?;

            keys.extend(output.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            match (output.is_truncated(), output.next_continuation_token()) {
                (Some(true), Some(next)) => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(keys)
    }

    fn canned_acl(visibility: Visibility) -> ObjectCannedAcl {
        match visibility {
            Visibility::Public => ObjectCannedAcl::PublicRead,
            Visibility::Private => ObjectCannedAcl::Private,
        }
    }
}

#[async_trait]
impl BlobStore for S3CompatibleStore {
    async fn exists(&self, path: &str) -> ChunkResult<bool> {
        let key = self.key(path);
        if key.is_empty() {
            return Ok(true);
        }

        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => return Ok(true),
            Err(err) if err.as_service_error().map_or(false, |e| e.is_not_found()) => {}
            Err(err) => return Err(ChunkError::backend(err)),
        }

        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.dir_prefix(path))
            .max_keys(1)
            .send()
            .await
            .map_err(ChunkError::backend)?;
        Ok(!output.contents().is_empty())
    }

    async fn make_directory(&self, path: &str) -> ChunkResult<()> {
        let marker = self.dir_prefix(path);
        if marker.is_empty() {
            return Ok(());
        }
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(marker)
            .body(AwsByteStream::from(Vec::new()))
            .send()
            .await
            .map_err(ChunkError::backend)?;
        Ok(())
    }

    async fn list_files(&self, path: &str) -> ChunkResult<Vec<String>> {
        Ok(self.list_level(path).await?.0)
    }

    async fn list_directories(&self, path: &str) -> ChunkResult<Vec<String>> {
        Ok(self.list_level(path).await?.1)
    }

    async fn size(&self, path: &str) -> ChunkResult<u64> {
        let key = self.key(path);
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(head) => Ok(head.content_length().unwrap_or(0).max(0) as u64),
            Err(err) if err.as_service_error().map_or(false, |e| e.is_not_found()) => {
                Err(ChunkError::not_found(normalize_path(path)))
            }
            Err(err) => Err(ChunkError::backend(err)),
        }
    }

    async fn read_stream(&self, path: &str) -> ChunkResult<ByteStream> {
        let key = self.key(path);
        let output = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().map_or(false, |e| e.is_no_such_key()) => {
                return Err(ChunkError::not_found(normalize_path(path)))
            }
            Err(err) => return Err(ChunkError::backend(err)),
        };

        let body = output.body.collect().await.map_err(ChunkError::backend)?;
        Ok(bytes_stream(body.into_bytes()))
    }

    async fn write_stream(
        &self,
        path: &str,
        stream: ByteStream,
        options: &StoreOptions,
    ) -> ChunkResult<u64> {
        let data = collect_stream(stream).await?;
        let written = data.len() as u64;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .body(AwsByteStream::from(data.to_vec()));

        if let Some(content_type) = &options.content_type {
            request = request.content_type(content_type);
        }
        if let Some(visibility) = options.visibility {
            request = request.acl(Self::canned_acl(visibility));
        }
        for (name, value) in &options.metadata {
            request = request.metadata(name, value);
        }

        request.send().await.map_err(ChunkError::backend)?;
        Ok(written)
    }

    async fn delete(&self, path: &str) -> ChunkResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
            .map_err(ChunkError::backend)?;
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> ChunkResult<()> {
        if self.dir_prefix(path).is_empty() {
            return Err(ChunkError::invalid("refusing to delete the bucket root"));
        }
        for key in self.list_recursive(path).await? {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(ChunkError::backend)?;
        }
        Ok(())
    }

    async fn set_visibility(&self, path: &str, visibility: Visibility) -> ChunkResult<()> {
        self.client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(self.key(path))
            .acl(Self::canned_acl(visibility))
            .send()
            .await
            .map_err(ChunkError::backend)?;
        Ok(())
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic().with_visibility()
    }
}
