use super::{Coordinator, CoordinatorError, CoordinatorResult};
use crate::config::CoordinatorConfig;
use fractal_training::artifacts::tmp_path;
use fractal_training::{Task, TaskLayout};
use reqwest::StatusCode;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use std::fs::{self, File};
use std::path::Path;
use tracing::{debug, info, warn};

/// Coordinator reached over plain HTTP.
///
/// * `GET  {base}/task?device_id=..&flush_previous=true`: `200` with a task,
///   `204`/`403`/`404` when none is available
/// * `GET  {base}/download/{model,images,labels}`
/// * `POST {base}/upload/checkpoint` (multipart `task_id`, `device_id`, `file`)
#[derive(Debug, Clone)]
pub struct HttpCoordinator {
    http_client: Client,
    base_url: String,
}

impl HttpCoordinator {
    pub fn new(config: &CoordinatorConfig) -> CoordinatorResult<Self> {
        let http_client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { http_client, base_url: config.base_url.trim_end_matches('/').to_string() })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn check(response: Response) -> CoordinatorResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(CoordinatorError::Status { status: status.as_u16(), body })
    }

    fn download_to(&self, endpoint: &str, dest: &Path) -> CoordinatorResult<u64> {
        let mut response = Self::check(self.http_client.get(self.url(&format!("download/{endpoint}"))).send()?)?;

        let tmp = tmp_path(dest);
        let written = (|| -> CoordinatorResult<u64> {
            let mut file = File::create(&tmp)?;
            let written = response.copy_to(&mut file)?;
            file.sync_all()?;
            Ok(written)
        })();
        match written {
            Ok(bytes) => {
                fs::rename(&tmp, dest)?;
                debug!(endpoint, bytes, path = %dest.display(), "resource downloaded");
                Ok(bytes)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e)
            }
        }
    }
}

impl Coordinator for HttpCoordinator {
    fn fetch_task(&self, device_id: &str) -> CoordinatorResult<Option<Task>> {
        let response = self
            .http_client
            .get(self.url("task"))
            .query(&[("device_id", device_id), ("flush_previous", "true")])
            .send()?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                debug!(status = response.status().as_u16(), "no task available");
                return Ok(None);
            }
            _ => {}
        }

        let body = Self::check(response)?.text()?;
        let task: Task = serde_json::from_str(&body).map_err(|e| CoordinatorError::InvalidTask(e.to_string()))?;
        info!(task_id = %task.task_id, epochs = task.epochs, "task received");
        Ok(Some(task))
    }

    fn download_resources(&self, task: &Task, layout: &TaskLayout) -> CoordinatorResult<()> {
        layout.ensure_root()?;
        for (endpoint, dest) in [
            ("model", layout.model_path(task)),
            ("images", layout.images_path(task)),
            ("labels", layout.labels_path(task)),
        ] {
            self.download_to(endpoint, &dest)?;
        }
        Ok(())
    }

    fn upload_artifact(&self, task: &Task, device_id: &str, weights: &Path) -> CoordinatorResult<()> {
        let bytes = fs::read(weights)?;
        let file_name = weights
            .file_name()
            .map_or_else(|| task.checkpoint_filename.clone(), |n| n.to_string_lossy().to_string());
        let size = bytes.len();
        let form = Form::new()
            .text("task_id", task.task_id.to_string())
            .text("device_id", device_id.to_string())
            .part("file", Part::bytes(bytes).file_name(file_name));

        let response = self.http_client.post(self.url("upload/checkpoint")).multipart(form).send()?;
        if let Err(e) = Self::check(response) {
            warn!(task_id = %task.task_id, error = %e, "upload rejected");
            return Err(e);
        }
        info!(task_id = %task.task_id, bytes = size, "weights uploaded");
        Ok(())
    }
}
