//! Bing Image Creator client (!pic): request a generation, poll the async
//! results page, scrape the image links, and download one into a scratch
//! directory for upload.

use super::ImageBackend;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CREATE_BASE: &str = "https://www.bing.com";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLLS: usize = 60;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("image api error: {0}")]
    Api(String),
    #[error("saving image failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Image Creator client authenticated with the `_U` cookie.
pub struct ImageClient {
    base_url: String,
    auth_cookie: String,
    client: reqwest::Client,
    src_re: Regex,
}

impl ImageClient {
    pub fn new(auth_cookie: impl Into<String>) -> Result<Self, ImageError> {
        // redirects carry the request id, so they must not be followed
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            base_url: CREATE_BASE.to_string(),
            auth_cookie: auth_cookie.into(),
            client,
            src_re: Regex::new(r#"src="([^"]+)""#).unwrap(),
        })
    }

    fn cookie_header(&self) -> String {
        format!("_U={}", self.auth_cookie)
    }

    /// Kick off a generation; the request id comes back in the redirect
    /// Location header.
    async fn request_generation(&self, prompt: &str) -> Result<String, ImageError> {
        let url = format!(
            "{}/images/create?q={}&rt=4",
            self.base_url,
            urlencoding::encode(prompt)
        );
        let res = self
            .client
            .post(&url)
            .header(reqwest::header::COOKIE, self.cookie_header())
            .send()
            .await?;
        if !res.status().is_redirection() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ImageError::Api(format!(
                "create request not redirected: {} {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }
        let location = res
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ImageError::Api("redirect without location".to_string()))?;
        location
            .split("id=")
            .nth(1)
            .map(|id| id.split('&').next().unwrap_or(id).to_string())
            .ok_or_else(|| ImageError::Api(format!("no request id in redirect: {}", location)))
    }

    /// Poll the async results page until it renders, then scrape the image
    /// `src` links (thumbnail query params stripped).
    async fn poll_results(&self, request_id: &str, prompt: &str) -> Result<Vec<String>, ImageError> {
        let url = format!(
            "{}/images/create/async/results/{}?q={}",
            self.base_url,
            request_id,
            urlencoding::encode(prompt)
        );
        for _ in 0..MAX_POLLS {
            let res = self
                .client
                .get(&url)
                .header(reqwest::header::COOKIE, self.cookie_header())
                .send()
                .await?;
            let body = res.text().await.unwrap_or_default();
            if body.contains("errorMessage") {
                return Err(ImageError::Api("generation rejected by the service".to_string()));
            }
            if !body.trim().is_empty() {
                let links: Vec<String> = self
                    .src_re
                    .captures_iter(&body)
                    .filter_map(|c| c.get(1))
                    .map(|m| m.as_str().split('?').next().unwrap_or(m.as_str()).to_string())
                    .filter(|l| l.starts_with("http") && !l.ends_with(".svg"))
                    .collect();
                if !links.is_empty() {
                    return Ok(links);
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Err(ImageError::Api("timed out waiting for generation results".to_string()))
    }

    pub async fn get_image_links(&self, prompt: &str) -> Result<Vec<String>, ImageError> {
        let request_id = self.request_generation(prompt).await?;
        log::debug!("image: generation request {}", request_id);
        self.poll_results(&request_id, prompt).await
    }

    /// Download the first link into `dest_dir` and return the local path.
    /// The caller owns the scratch file from here on.
    pub async fn download_and_save(
        &self,
        links: &[String],
        dest_dir: &Path,
    ) -> Result<PathBuf, ImageError> {
        let link = links
            .first()
            .ok_or_else(|| ImageError::Api("no image links to download".to_string()))?;
        tokio::fs::create_dir_all(dest_dir).await?;
        let res = self.client.get(link).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(ImageError::Api(format!("download failed: {}", status)));
        }
        let bytes = res.bytes().await?;
        let path = dest_dir.join(format!("{}.jpeg", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, &bytes).await?;
        log::debug!("image: saved {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }
}

#[async_trait]
impl ImageBackend for ImageClient {
    async fn get_image_links(&self, prompt: &str) -> Result<Vec<String>, String> {
        ImageClient::get_image_links(self, prompt)
            .await
            .map_err(|e| e.to_string())
    }

    async fn download_and_save(
        &self,
        links: &[String],
        dest_dir: &Path,
    ) -> Result<PathBuf, String> {
        ImageClient::download_and_save(self, links, dest_dir)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn src_links_are_scraped_and_stripped() {
        let client = ImageClient::new("cookie").expect("client");
        let body = r#"<img src="https://th.bing.com/a.jpeg?w=270&h=270">
                      <img src="https://th.bing.com/b.jpeg?w=270">
                      <img src="/rp/spinner.svg">"#;
        let links: Vec<String> = client
            .src_re
            .captures_iter(body)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().split('?').next().unwrap_or(m.as_str()).to_string())
            .filter(|l| l.starts_with("http") && !l.ends_with(".svg"))
            .collect();
        assert_eq!(
            links,
            vec![
                "https://th.bing.com/a.jpeg".to_string(),
                "https://th.bing.com/b.jpeg".to_string()
            ]
        );
    }
}
