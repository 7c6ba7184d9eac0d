//! GitHub Discussions over the GraphQL API.
//!
//! Threads are discussions and sections are top-level discussion comments.
//! Every request goes through [`GITHUB_RETRY`]; GraphQL `errors` arrays are
//! turned into [`EicError::GraphQl`], which is not retried.

use crate::config::{GITHUB_RETRY, GitHubSettings, HTTP_TIMEOUT};
use crate::error::{EicError, Result};
use crate::reconcile::{DiscussionApi, Section, Thread};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

pub const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";

const REPOSITORY_ID_QUERY: &str = r#"
query($owner: String!, $name: String!) {
    repository(owner: $owner, name: $name) {
        id
    }
}"#;

const RECENT_DISCUSSIONS_QUERY: &str = r#"
query($owner: String!, $name: String!, $first: Int!) {
    repository(owner: $owner, name: $name) {
        discussions(first: $first, orderBy: {field: CREATED_AT, direction: DESC}) {
            nodes { id number title url }
        }
    }
}"#;

const CREATE_DISCUSSION_MUTATION: &str = r#"
mutation($repositoryId: ID!, $categoryId: ID!, $title: String!, $body: String!) {
    createDiscussion(input: {repositoryId: $repositoryId, categoryId: $categoryId, title: $title, body: $body}) {
        discussion { id number title url }
    }
}"#;

const DISCUSSION_COMMENTS_QUERY: &str = r#"
query($id: ID!, $first: Int!) {
    node(id: $id) {
        ... on Discussion {
            comments(first: $first) {
                nodes { id body }
            }
        }
    }
}"#;

const ADD_COMMENT_MUTATION: &str = r#"
mutation($discussionId: ID!, $body: String!) {
    addDiscussionComment(input: {discussionId: $discussionId, body: $body}) {
        comment { id }
    }
}"#;

const UPDATE_COMMENT_MUTATION: &str = r#"
mutation($commentId: ID!, $body: String!) {
    updateDiscussionComment(input: {commentId: $commentId, body: $body}) {
        comment { id }
    }
}"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryIdData {
    repository: IdOnly,
}

#[derive(Debug, Deserialize)]
struct DiscussionNode {
    id: String,
    number: u64,
    title: String,
    url: String,
}

impl From<DiscussionNode> for Thread {
    fn from(node: DiscussionNode) -> Self {
        Thread {
            id: node.id,
            number: node.number,
            url: node.url,
            title: node.title,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecentDiscussionsData {
    repository: RecentDiscussionsRepo,
}

#[derive(Debug, Deserialize)]
struct RecentDiscussionsRepo {
    discussions: Nodes<DiscussionNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDiscussionData {
    create_discussion: CreatedDiscussion,
}

#[derive(Debug, Deserialize)]
struct CreatedDiscussion {
    discussion: DiscussionNode,
}

#[derive(Debug, Deserialize)]
struct CommentNode {
    id: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct DiscussionCommentsData {
    node: Option<DiscussionComments>,
}

#[derive(Debug, Deserialize)]
struct DiscussionComments {
    comments: Nodes<CommentNode>,
}

#[derive(Debug, Deserialize)]
struct CommentPayload {
    comment: IdOnly,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCommentData {
    add_discussion_comment: CommentPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateCommentData {
    update_discussion_comment: CommentPayload,
}

/// Unwrap a GraphQL envelope: any `errors` entry fails the call.
///
/// The envelope is decoded loosely first, so a partial `data` object that
/// does not fit `T` still reports the remote's error messages.
fn into_data<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let response: GraphQlResponse = serde_json::from_slice(body)?;
    if !response.errors.is_empty() {
        let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(EicError::GraphQl(messages.join("; ")));
    }
    let data = response
        .data
        .ok_or_else(|| EicError::Malformed("GraphQL response without data".to_string()))?;
    Ok(serde_json::from_value(data)?)
}

#[derive(Debug)]
pub struct GitHubDiscussions {
    http: reqwest::Client,
    endpoint: String,
    owner: String,
    repo: String,
    category_id: Option<String>,
    repository_id: OnceCell<String>,
}

impl GitHubDiscussions {
    pub fn new(settings: &GitHubSettings, category_id: Option<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", settings.token))
            .map_err(|e| EicError::Config(format!("invalid GITHUB_TOKEN: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("eic_digest/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            endpoint: GITHUB_GRAPHQL_URL.to_string(),
            owner: settings.owner.clone(),
            repo: settings.repo.clone(),
            category_id,
            repository_id: OnceCell::new(),
        })
    }

    async fn post_once<T: DeserializeOwned>(&self, payload: &Value) -> Result<T> {
        let response = self.http.post(&self.endpoint).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(EicError::from_response(response).await);
        }
        let body = response.bytes().await?;
        into_data(&body)
    }

    /// Run one query or mutation under the retry policy.
    async fn graphql<T: DeserializeOwned>(&self, label: &str, query: &str, variables: Value) -> Result<T> {
        let payload = json!({ "query": query, "variables": variables });
        debug!(label, "GraphQL request");
        GITHUB_RETRY.run(label, || self.post_once::<T>(&payload)).await
    }

    /// Repository node id, looked up once per client.
    async fn repository_id(&self) -> Result<&str> {
        let id = self
            .repository_id
            .get_or_try_init(|| async {
                let data: RepositoryIdData = self
                    .graphql(
                        "repository_id",
                        REPOSITORY_ID_QUERY,
                        json!({ "owner": self.owner, "name": self.repo }),
                    )
                    .await?;
                Ok::<_, EicError>(data.repository.id)
            })
            .await?;
        Ok(id.as_str())
    }
}

impl DiscussionApi for GitHubDiscussions {
    #[instrument(level = "info", skip(self))]
    async fn recent_threads(&self, limit: usize) -> Result<Vec<Thread>> {
        let data: RecentDiscussionsData = self
            .graphql(
                "recent_discussions",
                RECENT_DISCUSSIONS_QUERY,
                json!({ "owner": self.owner, "name": self.repo, "first": limit }),
            )
            .await?;
        Ok(data.repository.discussions.nodes.into_iter().map(Thread::from).collect())
    }

    #[instrument(level = "info", skip(self, body))]
    async fn create_thread(&self, title: &str, body: &str) -> Result<Thread> {
        let Some(category_id) = self.category_id.as_deref() else {
            return Err(EicError::Config(
                "discussion category id not configured (EIC_DISCUSSION_CATEGORY_ID or config/categories.json)"
                    .to_string(),
            ));
        };
        let repository_id = self.repository_id().await?;

        let data: CreateDiscussionData = self
            .graphql(
                "create_discussion",
                CREATE_DISCUSSION_MUTATION,
                json!({
                    "repositoryId": repository_id,
                    "categoryId": category_id,
                    "title": title,
                    "body": body,
                }),
            )
            .await?;
        Ok(data.create_discussion.discussion.into())
    }

    #[instrument(level = "info", skip(self))]
    async fn list_sections(&self, thread_id: &str, limit: usize) -> Result<Vec<Section>> {
        let data: DiscussionCommentsData = self
            .graphql(
                "discussion_comments",
                DISCUSSION_COMMENTS_QUERY,
                json!({ "id": thread_id, "first": limit }),
            )
            .await?;
        let node = data
            .node
            .ok_or_else(|| EicError::Malformed(format!("discussion {thread_id} not found")))?;
        Ok(node
            .comments
            .nodes
            .into_iter()
            .map(|c| Section { id: c.id, body: c.body })
            .collect())
    }

    #[instrument(level = "info", skip(self, body))]
    async fn create_section(&self, thread_id: &str, body: &str) -> Result<String> {
        let data: AddCommentData = self
            .graphql(
                "add_comment",
                ADD_COMMENT_MUTATION,
                json!({ "discussionId": thread_id, "body": body }),
            )
            .await?;
        Ok(data.add_discussion_comment.comment.id)
    }

    #[instrument(level = "info", skip(self, body))]
    async fn update_section(&self, section_id: &str, body: &str) -> Result<()> {
        let data: UpdateCommentData = self
            .graphql(
                "update_comment",
                UPDATE_COMMENT_MUTATION,
                json!({ "commentId": section_id, "body": body }),
            )
            .await?;
        debug!(comment_id = %data.update_discussion_comment.comment.id, "Comment updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn settings() -> GitHubSettings {
        GitHubSettings {
            token: "ghp_test".to_string(),
            owner: "o".to_string(),
            repo: "r".to_string(),
            category_id: None,
        }
    }

    /// Read one HTTP request (headers plus `Content-Length` body).
    fn read_request(stream: &mut impl Read) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Answer every request with `200` and `payload`, counting requests.
    fn spawn_http(payload: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                read_request(&mut stream);
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                    payload.len()
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });
        (format!("http://{addr}"), hits)
    }

    #[test]
    fn test_errors_array_becomes_graphql_error() {
        let raw = br#"{"data": null, "errors": [{"message": "Bad category"}, {"message": "Also bad"}]}"#;
        let err = into_data::<RepositoryIdData>(raw).unwrap_err();
        assert!(matches!(&err, EicError::GraphQl(m) if m == "Bad category; Also bad"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_errors_reported_even_when_data_does_not_fit() {
        let raw = br#"{"data": {"repository": null}, "errors": [{"message": "Could not resolve to a Repository"}]}"#;
        let err = into_data::<RecentDiscussionsData>(raw).unwrap_err();
        assert!(matches!(&err, EicError::GraphQl(m) if m.contains("Could not resolve")));
    }

    #[test]
    fn test_unexpected_shape_is_malformed() {
        let err = into_data::<RepositoryIdData>(br#"{"data": {"repository": null}}"#).unwrap_err();
        assert!(matches!(err, EicError::Malformed(_)));
        assert!(!err.is_transient());
        assert!(matches!(into_data::<RepositoryIdData>(b"<html>"), Err(EicError::Malformed(_))));
    }

    #[test]
    fn test_discussions_payload_maps_to_threads() {
        let raw = br#"{"data": {"repository": {"discussions": {"nodes": [
            {"id": "D_1", "number": 7, "title": "[EIC][Daily] 2024-01-15 (JST)", "url": "https://github.com/o/r/discussions/7"}
        ]}}}}"#;
        let threads: Vec<Thread> = into_data::<RecentDiscussionsData>(raw)
            .unwrap()
            .repository
            .discussions
            .nodes
            .into_iter()
            .map(Thread::from)
            .collect();
        assert_eq!(threads[0].number, 7);
        assert_eq!(threads[0].title, "[EIC][Daily] 2024-01-15 (JST)");
    }

    #[test]
    fn test_comment_mutation_payload() {
        let raw = br#"{"data": {"addDiscussionComment": {"comment": {"id": "DC_9"}}}}"#;
        assert_eq!(into_data::<AddCommentData>(raw).unwrap().add_discussion_comment.comment.id, "DC_9");
    }

    #[test]
    fn test_missing_data_is_malformed() {
        assert!(matches!(into_data::<RepositoryIdData>(b"{}"), Err(EicError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_graphql_error_on_success_status_is_not_retried() {
        let (endpoint, hits) = spawn_http(
            r#"{"data":{"repository":null},"errors":[{"message":"Could not resolve to a Repository with the name 'o/r'."}]}"#,
        );
        let mut client = GitHubDiscussions::new(&settings(), None).unwrap();
        client.endpoint = endpoint;

        let err = client.recent_threads(50).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("Could not resolve to a Repository"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_thread_requires_category() {
        let client = GitHubDiscussions::new(&settings(), None).unwrap();
        let err = client.create_thread("t", "b").await.unwrap_err();
        assert!(matches!(err, EicError::Config(_)));
    }
}
