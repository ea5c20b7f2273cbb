use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Mount a token endpoint answering `grant_type=<grant>` with `access_token`.
#[allow(dead_code)]
pub async fn mount_token_endpoint(
    server: &MockServer,
    grant: &str,
    access_token: &str,
    expected_calls: u64,
) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains(format!("grant_type={grant}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn query_map(req: &Request) -> HashMap<String, String> {
    req.url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// A collection of `total` items `{ "id": n }` served with either paging
/// convention. Cursor tokens are `c<offset>`.
#[allow(dead_code)]
pub struct PagedCollection {
    pub total: usize,
    pub offset_style: bool,
    pub pages_served: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl PagedCollection {
    pub fn new(total: usize, offset_style: bool) -> Self {
        Self {
            total,
            offset_style,
            pages_served: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Respond for PagedCollection {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        self.pages_served.fetch_add(1, Ordering::SeqCst);
        let query = query_map(req);
        let limit: usize = query.get("limit").and_then(|l| l.parse().ok()).unwrap_or(100);
        let offset: usize = if self.offset_style {
            query.get("offset").and_then(|o| o.parse().ok()).unwrap_or(0)
        } else {
            query
                .get("cursor")
                .and_then(|c| c.strip_prefix('c'))
                .and_then(|o| o.parse().ok())
                .unwrap_or(0)
        };

        let end = (offset + limit).min(self.total);
        let items: Vec<Value> = (offset..end).map(|i| json!({ "id": i + 1 })).collect();

        let body = if self.offset_style {
            json!({ "offset": offset, "limit": limit, "total": self.total, "items": items })
        } else {
            let next = if end < self.total {
                Value::String(format!("c{end}"))
            } else {
                Value::Null
            };
            json!({ "nextCursor": next, "hasMore": end < self.total, "items": items })
        };
        ResponseTemplate::new(200).set_body_json(body)
    }
}

/// Mount `collection` at GET `route`.
#[allow(dead_code)]
pub async fn mount_collection(server: &MockServer, route: &str, collection: PagedCollection) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(collection)
        .mount(server)
        .await;
}

/// Provider-side state of one simulated bulk job.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct SimulatedJob {
    pub state: String,
    pub uploads: usize,
    pub polls_after_close: usize,
}

/// In-memory bulk job REST surface under `/jobs`. After close, the job reports
/// `InProgress` for `polls_until_complete` polls and then `JobComplete`.
#[derive(Clone)]
#[allow(dead_code)]
pub struct BulkSurface {
    pub jobs: Arc<Mutex<HashMap<String, SimulatedJob>>>,
    pub polls_until_complete: usize,
    next_id: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl BulkSurface {
    pub fn new(polls_until_complete: usize) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            polls_until_complete,
            next_id: Arc::new(AtomicUsize::new(1)),
        }
    }

    pub fn job(&self, id: &str) -> Option<SimulatedJob> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    pub async fn mount(&self, server: &MockServer) {
        Mock::given(path_regex(r"^/jobs(/.*)?$"))
            .respond_with(self.clone())
            .mount(server)
            .await;
    }

    fn descriptor(id: &str, job: &SimulatedJob) -> Value {
        let (processed, failed) = if job.state == "JobComplete" { (3, 1) } else { (0, 0) };
        json!({
            "id": id,
            "object": "Account",
            "operation": "insert",
            "state": job.state,
            "numberRecordsProcessed": processed,
            "numberRecordsFailed": failed,
        })
    }
}

impl Respond for BulkSurface {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        let segments: Vec<&str> = req
            .url
            .path()
            .trim_start_matches('/')
            .split('/')
            .collect();
        let mut jobs = self.jobs.lock().unwrap();

        match (req.method.as_str(), segments.as_slice()) {
            ("POST", ["jobs"]) => {
                let id = format!("750J{:04}", self.next_id.fetch_add(1, Ordering::SeqCst));
                let job = SimulatedJob {
                    state: "Open".into(),
                    uploads: 0,
                    polls_after_close: 0,
                };
                let body = Self::descriptor(&id, &job);
                jobs.insert(id, job);
                ResponseTemplate::new(200).set_body_json(body)
            }
            ("PUT", ["jobs", id, "data"]) => match jobs.get_mut(*id) {
                Some(job) if job.state == "Open" => {
                    job.uploads += 1;
                    ResponseTemplate::new(201)
                }
                Some(_) => ResponseTemplate::new(400)
                    .set_body_json(json!([{ "errorCode": "INVALIDJOBSTATE", "message": "Job not open" }])),
                None => ResponseTemplate::new(404),
            },
            ("PATCH", ["jobs", id]) => {
                let requested = serde_json::from_slice::<Value>(&req.body)
                    .ok()
                    .and_then(|v| v["state"].as_str().map(str::to_string));
                match (jobs.get_mut(*id), requested) {
                    (Some(job), Some(state)) => {
                        job.state = state;
                        let body = Self::descriptor(id, job);
                        ResponseTemplate::new(200).set_body_json(body)
                    }
                    (None, _) => ResponseTemplate::new(404),
                    (_, None) => ResponseTemplate::new(400),
                }
            }
            ("GET", ["jobs", id]) => match jobs.get_mut(*id) {
                Some(job) => {
                    if job.state == "UploadComplete" || job.state == "InProgress" {
                        job.polls_after_close += 1;
                        job.state = if job.polls_after_close > self.polls_until_complete {
                            "JobComplete".into()
                        } else {
                            "InProgress".into()
                        };
                    }
                    let body = Self::descriptor(id, job);
                    ResponseTemplate::new(200).set_body_json(body)
                }
                None => ResponseTemplate::new(404),
            },
            ("GET", ["jobs", id, kind]) => match jobs.get(*id) {
                Some(job) if job.state == "JobComplete" => {
                    let csv = match *kind {
                        "successfulResults" => "sf__Id,sf__Created,Name\n001A,true,Acme\n001B,true,Globex\n",
                        "failedResults" => "sf__Id,sf__Error,Name\n,REQUIRED_FIELD_MISSING,\n",
                        _ => "Name\n",
                    };
                    ResponseTemplate::new(200).set_body_string(csv)
                }
                Some(_) => ResponseTemplate::new(400),
                None => ResponseTemplate::new(404),
            },
            _ => ResponseTemplate::new(404),
        }
    }
}
