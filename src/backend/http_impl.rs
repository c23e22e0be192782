use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::*;
use crate::config::RemoteConfig;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("remote returned errno {errno}{}", suffix(.message))]
    Errno { errno: i64, message: Option<String> },
    #[error("invalid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("response contained no file")]
    EmptyResponse,
}

fn suffix(message: &Option<String>) -> String {
    message.as_deref().map(|m| format!(": {m}")).unwrap_or_default()
}

#[derive(Deserialize)]
struct CreateResponse {
    data: RemoteFile,
}

#[derive(Deserialize)]
struct CopyResponse {
    #[serde(default)]
    list: Vec<RemoteFile>,
}

/// Talks to the photo service over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    config: RemoteConfig,
}

impl HttpBackend {
    pub fn new(config: RemoteConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: RemoteConfig) -> Self {
        Self { client, config }
    }

    fn token(&self) -> [(&'static str, &str); 1] {
        [("access_token", self.config.access_token.as_str())]
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, String)],
    ) -> Result<T, HttpError> {
        let response = self
            .client
            .post(url)
            .query(&self.token())
            .form(form)
            .send()
            .await?;
        decode(response).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, HttpError> {
        let response = self
            .client
            .get(url)
            .query(&self.token())
            .query(query)
            .send()
            .await?;
        decode(response).await
    }
}

/// Parses a JSON body, turning a non-zero `errno` into an error.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, HttpError> {
    let body: Value = response.error_for_status()?.json().await?;

    let errno = body.get("errno").and_then(Value::as_i64).unwrap_or(0);
    if errno != 0 {
        let message = body
            .get("errmsg")
            .or_else(|| body.get("show_msg"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return Err(HttpError::Errno { errno, message });
    }

    Ok(serde_json::from_value(body)?)
}

fn fsid_list(file: &AlbumFile) -> String {
    json!([{ "fsid": file.file.fs_id, "uk": file.uk }]).to_string()
}

#[async_trait::async_trait]
impl Backend for HttpBackend {
    type Error = HttpError;

    async fn precreate(&self, request: &PrecreateRequest) -> Result<PrecreateResponse, HttpError> {
        let url = format!("{}/precreate", self.config.file_api_url);
        self.post_form(&url, &request.form()?).await
    }

    async fn upload_block(&self, block: BlockUpload) -> Result<(), HttpError> {
        let partseq = block.partseq();
        let query = [
            ("method", "upload".to_string()),
            ("path", block.path),
            ("partseq", partseq.to_string()),
            ("uploadid", block.upload_id),
        ];

        let len = block.data.descriptor().len;
        let body = Body::wrap_stream(ReaderStream::new(block.data.into_reader()));
        let part = Part::stream_with_length(body, len).file_name(block.file_name);
        let form = Form::new().part("file", part);

        debug!(partseq, len, "sending block");
        let response = self
            .client
            .post(&self.config.upload_url)
            .query(&self.token())
            .query(&query)
            .multipart(form)
            .send()
            .await?;
        decode::<Value>(response).await?;
        Ok(())
    }

    async fn create(
        &self,
        request: &PrecreateRequest,
        upload_id: &str,
    ) -> Result<RemoteFile, HttpError> {
        let url = format!("{}/create", self.config.file_api_url);
        let mut form = request.form()?;
        form.push(("uploadid", upload_id.to_string()));

        let response: CreateResponse = self.post_form(&url, &form).await?;
        Ok(response.data)
    }

    async fn add_album_file(
        &self,
        album: &Album,
        file: &RemoteFile,
    ) -> Result<AlbumFile, HttpError> {
        let url = format!("{}/addfile", self.config.album_api_url);
        let query = [
            ("album_id", album.album_id.clone()),
            ("list", json!([{ "fsid": file.fs_id }]).to_string()),
            ("tid", album.tid.to_string()),
            ("uk", self.config.uk.to_string()),
        ];
        self.get::<Value>(&url, &query).await?;

        Ok(AlbumFile {
            file: file.clone(),
            album_id: album.album_id.clone(),
            tid: album.tid,
            uk: self.config.uk,
        })
    }

    async fn copy_album_file(&self, file: &AlbumFile) -> Result<RemoteFile, HttpError> {
        let url = format!("{}/copyfile", self.config.album_api_url);
        let query = [
            ("album_id", file.album_id.clone()),
            ("tid", file.tid.to_string()),
            ("uk", file.uk.to_string()),
            ("list", fsid_list(file)),
        ];
        let response: CopyResponse = self.get(&url, &query).await?;
        response
            .list
            .into_iter()
            .next()
            .ok_or(HttpError::EmptyResponse)
    }

    async fn delete_album_file(&self, file: &AlbumFile) -> Result<(), HttpError> {
        let url = format!("{}/delfile", self.config.album_api_url);
        let form = [
            ("album_id", file.album_id.clone()),
            ("tid", file.tid.to_string()),
            ("list", fsid_list(file)),
            ("del_origin", "0".to_string()),
        ];
        self.post_form::<Value>(&url, &form).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Form as AxumForm, Multipart, Query, State};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    use super::*;
    use crate::cancel::CancelSignal;
    use crate::digest::md5_hex;
    use crate::filestore::{FileStore, Upload};
    use crate::object::{Container, Entry};
    use crate::{Error, Stage, UploadConfig};

    type Params = HashMap<String, String>;

    #[derive(Default)]
    struct Seen {
        precreate: Vec<(Params, Params)>,
        blocks: Vec<(Params, Option<String>, Vec<u8>)>,
        create: Vec<Params>,
        addfile: Vec<Params>,
        precreate_errno: i64,
    }

    type Shared = Arc<Mutex<Seen>>;

    async fn precreate(
        State(seen): State<Shared>,
        Query(query): Query<Params>,
        AxumForm(form): AxumForm<Params>,
    ) -> Json<Value> {
        let mut seen = seen.lock().unwrap();
        let errno = seen.precreate_errno;
        seen.precreate.push((query, form));
        if errno != 0 {
            return Json(json!({ "errno": errno, "errmsg": "no permission" }));
        }
        Json(json!({
            "errno": 0,
            "return_type": 1,
            "uploadid": "N1-test",
            "block_list": [0, 1, 2],
        }))
    }

    async fn superfile2(
        State(seen): State<Shared>,
        Query(query): Query<Params>,
        mut multipart: Multipart,
    ) -> Json<Value> {
        let mut received = None;
        while let Some(field) = multipart.next_field().await.unwrap() {
            if field.name() == Some("file") {
                let file_name = field.file_name().map(str::to_string);
                let data = field.bytes().await.unwrap().to_vec();
                received = Some((file_name, data));
            }
        }
        let (file_name, data) = received.unwrap();
        let md5 = md5_hex(&data);
        seen.lock().unwrap().blocks.push((query, file_name, data));
        Json(json!({ "md5": md5, "request_id": 1 }))
    }

    async fn create(State(seen): State<Shared>, AxumForm(form): AxumForm<Params>) -> Json<Value> {
        let response = json!({
            "errno": 0,
            "data": {
                "fs_id": 4242,
                "path": form["path"],
                "server_filename": form["path"].trim_start_matches('/'),
                "size": form["size"].parse::<u64>().unwrap(),
                "md5": form["content-md5"],
                "ctime": 1,
                "mtime": 2,
            }
        });
        seen.lock().unwrap().create.push(form);
        Json(response)
    }

    async fn addfile(State(seen): State<Shared>, Query(query): Query<Params>) -> Json<Value> {
        seen.lock().unwrap().addfile.push(query);
        Json(json!({ "errno": 0 }))
    }

    async fn serve(seen: Shared) -> RemoteConfig {
        let app = Router::new()
            .route("/file/v1/precreate", post(precreate))
            .route("/file/v1/create", post(create))
            .route("/rest/2.0/pcs/superfile2", post(superfile2))
            .route("/album/v1/addfile", get(addfile))
            .with_state(seen);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        RemoteConfig {
            file_api_url: format!("http://{addr}/file/v1"),
            album_api_url: format!("http://{addr}/album/v1"),
            upload_url: format!("http://{addr}/rest/2.0/pcs/superfile2"),
            access_token: "token-123".into(),
            uk: 77,
        }
    }

    fn store(config: RemoteConfig) -> FileStore<HttpBackend> {
        FileStore::new(HttpBackend::new(config)).with_config(UploadConfig {
            block_size: 4,
            slice_size: 2,
            concurrency: 3,
        })
    }

    #[tokio::test]
    async fn full_upload_into_album() {
        let seen = Shared::default();
        let store = store(serve(Arc::clone(&seen)).await);
        let contents = b"0123456789";
        let album = Album {
            album_id: "album-1".into(),
            tid: 9,
            title: String::new(),
        };

        let entry = store
            .put(
                &Container::Album(album),
                Upload::new("digits.txt", &contents[..], 10),
                |_| {},
                &CancelSignal::new(),
            )
            .await
            .unwrap();

        let album_file = match entry {
            Entry::AlbumFile(album_file) => album_file,
            other => panic!("expected an album file, got {other:?}"),
        };
        assert_eq!(album_file.file.fs_id, 4242);
        assert_eq!(album_file.file.size, 10);
        assert_eq!(album_file.uk, 77);

        let seen = seen.lock().unwrap();
        let (query, form) = &seen.precreate[0];
        assert_eq!(query["access_token"], "token-123");
        assert_eq!(form["autoinit"], "1");
        assert_eq!(form["isdir"], "0");
        assert_eq!(form["rtype"], "1");
        assert_eq!(form["ctype"], "11");
        assert_eq!(form["path"], "/digits.txt");
        assert_eq!(form["size"], "10");
        assert_eq!(form["content-md5"], md5_hex(contents));
        assert_eq!(form["slice-md5"], md5_hex(b"01"));
        let block_list: Vec<String> = serde_json::from_str(&form["block_list"]).unwrap();
        assert_eq!(block_list, [md5_hex(b"0123"), md5_hex(b"4567"), md5_hex(b"89")]);

        let mut blocks: Vec<_> = seen
            .blocks
            .iter()
            .map(|(query, file_name, data)| {
                assert_eq!(query["method"], "upload");
                assert_eq!(query["uploadid"], "N1-test");
                assert_eq!(query["path"], "/digits.txt");
                assert_eq!(file_name.as_deref(), Some("digits.txt"));
                (query["partseq"].parse::<u32>().unwrap(), data.clone())
            })
            .collect();
        blocks.sort();
        let reassembled: Vec<u8> = blocks.into_iter().flat_map(|(_, data)| data).collect();
        assert_eq!(reassembled, contents);

        assert_eq!(seen.create.len(), 1);
        assert_eq!(seen.create[0]["uploadid"], "N1-test");
        assert_eq!(seen.create[0]["block_list"], form["block_list"]);

        assert_eq!(seen.addfile.len(), 1);
        assert_eq!(seen.addfile[0]["album_id"], "album-1");
        assert_eq!(seen.addfile[0]["tid"], "9");
        assert_eq!(seen.addfile[0]["list"], r#"[{"fsid":4242}]"#);
    }

    #[tokio::test]
    async fn errno_surfaces_as_precreate_failure() {
        let seen = Shared::default();
        seen.lock().unwrap().precreate_errno = -6;
        let store = store(serve(Arc::clone(&seen)).await);

        let err = store
            .put(
                &Container::Root,
                Upload::new("x.bin", &b"abcdef"[..], 6),
                |_| {},
                &CancelSignal::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Precreate));
        let Error::Remote { source, .. } = err else {
            unreachable!()
        };
        assert_eq!(source.to_string(), "remote returned errno -6: no permission");
        assert!(seen.lock().unwrap().blocks.is_empty());
    }
}
