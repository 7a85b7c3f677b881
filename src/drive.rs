use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::prelude::*;

lazy_static! {
    static ref DRIVE_URL_REGEX: Regex =
        Regex::new(r"^(?:https://)?drive\.google\.com/.*?/folders/(?P<drive_id>[A-Za-z0-9_-]+)").unwrap();
}

/// One entry of a drive folder listing; content is downloaded on demand.
#[derive(Clone, Debug, PartialEq)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub mime_type: String,
}

/// Extracts the folder id from a drive URL. The id is echoed downstream as
/// `source_loc`.
pub fn parse_drive_url(url: &str) -> Result<String> {
    DRIVE_URL_REGEX.captures(url)
        .map(|c| c.name("drive_id").unwrap().as_str().to_owned())
        .ok_or_else(|| anyhow!(IngestError::InvalidInput(format!("not a google drive folder url: {url}"))))
}

/// Thin listing/download client over the drive REST surface. All transport
/// goes through the [`HttpClient`] seam so tests can fake it.
pub struct DriveClient<'a> {
    http_client: &'a dyn HttpClient,
    api_key: String,
}

impl<'a> DriveClient<'a> {
    const FILES_URL: &'static str = "https://www.googleapis.com/drive/v3/files";

    pub fn new(http_client: &'a dyn HttpClient, api_key: String) -> Self {
        DriveClient { http_client, api_key }
    }

    /// Lists every record in the folder, following pagination.
    pub fn list_folder(&self, folder_id: &str) -> Result<Vec<FileRecord>> {
        let mut files = vec![];
        let mut page_token: Option<String> = None;
        loop {
            let mut url = format!("{}?q='{}'+in+parents&fields=nextPageToken,files(id,name,mimeType)&key={}",
                                  Self::FILES_URL, folder_id, self.api_key);
            if let Some(ref token) = page_token {
                url.push_str("&pageToken=");
                url.push_str(token);
            }
            let bytes = self.http_client.get_bytes(&url)
                .map_err(|e| anyhow!(IngestError::RemoteFailure(format!("drive listing: {e:#}"))))?;
            let json: Value = serde_json::from_slice(&bytes)?;

            let listed = json["files"].as_array()
                .with_context(|| "Drive listing response has no files array")?;
            for file in listed {
                files.push(FileRecord {
                    id: json_str_field(file, "id")?,
                    name: json_str_field(file, "name")?,
                    mime_type: json_str_field(file, "mimeType")?,
                });
            }

            page_token = json["nextPageToken"].as_str().map(|s| s.to_owned());
            if page_token.is_none() {
                break;
            }
        }
        Ok(files)
    }

    pub fn download(&self, record_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}?alt=media&key={}", Self::FILES_URL, record_id, self.api_key);
        self.http_client.get_bytes(&url)
            .map_err(|e| anyhow!(IngestError::RemoteFailure(format!("drive download of {record_id}: {e:#}"))))
    }
}

fn json_str_field(value: &Value, field: &str) -> Result<String> {
    value[field].as_str().map(|s| s.to_owned())
        .with_context(|| format!("Drive record has no {field} field"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn drive_url_accepts_folder_urls() -> EmptyRes {
        assert_eq!(parse_drive_url("https://drive.google.com/drive/u/0/folders/1a2B_c-3")?, "1a2B_c-3");
        assert_eq!(parse_drive_url("drive.google.com/drive/folders/abc?usp=sharing")?, "abc");
        Ok(())
    }

    #[test]
    fn drive_url_rejects_everything_else() {
        for url in ["https://example.com/folders/x",
                    "https://drive.google.com/file/d/xyz/view",
                    "not a url at all"] {
            let err = parse_drive_url(url).unwrap_err();
            assert!(matches!(IngestError::of(&err), Some(IngestError::InvalidInput(_))), "{url}");
        }
    }

    #[test]
    fn listing_follows_pagination() -> EmptyRes {
        struct PagedListing;
        impl HttpClient for PagedListing {
            fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
                let page = if url.contains("pageToken=next") {
                    serde_json::json!({
                        "files": [{"id": "2", "name": "IMG-W0.jpg", "mimeType": "image/jpeg"}],
                    })
                } else {
                    serde_json::json!({
                        "files": [{"id": "1", "name": "WhatsApp Chat with test", "mimeType": "text/plain"}],
                        "nextPageToken": "next",
                    })
                };
                Ok(serde_json::to_vec(&page)?)
            }
        }

        let client = DriveClient::new(&PagedListing, "key".to_owned());
        let files = client.list_folder("folder0")?;
        assert_eq!(files, vec![
            FileRecord {
                id: "1".to_owned(),
                name: "WhatsApp Chat with test".to_owned(),
                mime_type: "text/plain".to_owned(),
            },
            FileRecord {
                id: "2".to_owned(),
                name: "IMG-W0.jpg".to_owned(),
                mime_type: "image/jpeg".to_owned(),
            },
        ]);
        Ok(())
    }

    #[test]
    fn transport_errors_become_remote_failures() {
        struct FailingClient;
        impl HttpClient for FailingClient {
            fn get_bytes(&self, _url: &str) -> Result<Vec<u8>> {
                err!("connection reset")
            }
        }

        let client = DriveClient::new(&FailingClient, "key".to_owned());
        let err = client.list_folder("folder0").unwrap_err();
        assert!(matches!(IngestError::of(&err), Some(IngestError::RemoteFailure(_))), "{err:#}");
        let err = client.download("1").unwrap_err();
        assert!(matches!(IngestError::of(&err), Some(IngestError::RemoteFailure(_))), "{err:#}");
    }
}
