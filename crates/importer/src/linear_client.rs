use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{IssuePage, IssuePageRequest, LinearConnection, LinearIssue, LinearSource};

const ISSUES_QUERY: &str = r#"
query ImportIssues($first: Int!, $after: String, $filter: IssueFilter) {
  issues(first: $first, after: $after, filter: $filter, orderBy: createdAt) {
    nodes {
      id
      identifier
      title
      description
      priority
      dueDate
      state { type name }
      assignee { email }
      project { id }
    }
    pageInfo { hasNextPage endCursor }
  }
}
"#;

/// Linear GraphQL API客户端
pub struct LinearGraphqlClient {
    client: reqwest::Client,
    api_url: String,
    timeout: Duration,
}

impl LinearGraphqlClient {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            timeout,
        }
    }

    fn variables(request: &IssuePageRequest) -> Value {
        let filter = if request.project_ids.is_empty() {
            Value::Null
        } else {
            json!({ "project": { "id": { "in": request.project_ids } } })
        };

        json!({
            "first": request.page_size,
            "after": request.cursor,
            "filter": filter,
        })
    }
}

#[async_trait]
impl LinearSource for LinearGraphqlClient {
    async fn fetch_issues(
        &self,
        connection: &LinearConnection,
        request: &IssuePageRequest,
    ) -> SchedulerResult<IssuePage> {
        debug!(
            "请求Linear工作项: 连接 {}, 游标 {:?}",
            connection.id, request.cursor
        );

        let response = self
            .client
            .post(&self.api_url)
            .timeout(self.timeout)
            .bearer_auth(&connection.access_token)
            .json(&json!({
                "query": ISSUES_QUERY,
                "variables": Self::variables(request),
            }))
            .send()
            .await
            .map_err(|e| SchedulerError::ExternalTransient(format!("Linear请求失败: {e}")))?;

        let status = response.status();
        if let Some(error) = classify_status(status) {
            warn!("Linear返回错误状态: {} (连接 {})", status, connection.id);
            return Err(error);
        }

        let body: Value = response.json().await.map_err(|e| {
            SchedulerError::ExternalTransient(format!("Linear响应无法解析: {e}"))
        })?;
        parse_issue_page(body)
    }
}

/// 按HTTP状态区分可重试和不可重试的错误
pub fn classify_status(status: StatusCode) -> Option<SchedulerError> {
    if status.is_success() {
        return None;
    }
    let message = format!("Linear API返回状态码 {}", status.as_u16());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Some(SchedulerError::ExternalRejected(message))
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            Some(SchedulerError::ExternalTransient(message))
        }
        s if s.is_server_error() => Some(SchedulerError::ExternalTransient(message)),
        _ => Some(SchedulerError::ExternalRejected(message)),
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<IssuesData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
    #[serde(default)]
    extensions: Option<GraphqlErrorExtensions>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorExtensions {
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssuesData {
    issues: IssueConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueConnection {
    nodes: Vec<IssueNode>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueNode {
    id: String,
    identifier: Option<String>,
    #[serde(default)]
    title: Option<String>,
    description: Option<String>,
    priority: Option<f64>,
    due_date: Option<String>,
    state: Option<StateNode>,
    assignee: Option<UserNode>,
    project: Option<ProjectNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateNode {
    #[serde(rename = "type")]
    state_type: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserNode {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectNode {
    id: String,
}

impl From<IssueNode> for LinearIssue {
    fn from(node: IssueNode) -> Self {
        let (state_type, state_name) = match node.state {
            Some(state) => (state.state_type, state.name),
            None => (None, None),
        };
        LinearIssue {
            id: node.id,
            identifier: node.identifier,
            title: node.title.unwrap_or_default(),
            description: node.description,
            priority: node.priority.map(|p| p.round() as i32),
            due_date: node.due_date,
            state_type,
            state_name,
            assignee_email: node.assignee.and_then(|a| a.email),
            project_id: node.project.map(|p| p.id),
        }
    }
}

/// 解析GraphQL响应体
pub fn parse_issue_page(body: Value) -> SchedulerResult<IssuePage> {
    let response: GraphqlResponse = serde_json::from_value(body).map_err(|e| {
        SchedulerError::ExternalTransient(format!("Linear响应格式错误: {e}"))
    })?;

    if let Some(error) = response.errors.first() {
        let code = error
            .extensions
            .as_ref()
            .and_then(|ext| ext.code.as_deref())
            .unwrap_or_default();
        let message = format!("Linear GraphQL错误 [{}]: {}", code, error.message);
        return Err(match code {
            "AUTHENTICATION_ERROR" | "FORBIDDEN" => SchedulerError::ExternalRejected(message),
            _ => SchedulerError::ExternalTransient(message),
        });
    }

    let connection = response
        .data
        .ok_or_else(|| SchedulerError::ExternalTransient("Linear响应缺少data字段".to_string()))?
        .issues;

    let next_cursor = if connection.page_info.has_next_page {
        connection.page_info.end_cursor
    } else {
        None
    };

    Ok(IssuePage {
        issues: connection.nodes.into_iter().map(LinearIssue::from).collect(),
        next_cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_issue_page() {
        let body = json!({
            "data": {
                "issues": {
                    "nodes": [
                        {
                            "id": "iss-1",
                            "identifier": "ENG-1",
                            "title": "Fix login",
                            "description": null,
                            "priority": 2.0,
                            "dueDate": "2026-03-01",
                            "state": { "type": "started", "name": "In Progress" },
                            "assignee": { "email": "alice@example.com" },
                            "project": { "id": "lp-1" }
                        },
                        {
                            "id": "iss-2",
                            "identifier": null,
                            "title": "No project",
                            "description": "text",
                            "priority": null,
                            "dueDate": null,
                            "state": null,
                            "assignee": null,
                            "project": null
                        }
                    ],
                    "pageInfo": { "hasNextPage": true, "endCursor": "cursor-2" }
                }
            }
        });

        let page = parse_issue_page(body).unwrap();
        assert_eq!(page.next_cursor.as_deref(), Some("cursor-2"));
        assert_eq!(page.issues.len(), 2);
        assert_eq!(page.issues[0].priority, Some(2));
        assert_eq!(page.issues[0].state_type.as_deref(), Some("started"));
        assert_eq!(page.issues[0].assignee_email.as_deref(), Some("alice@example.com"));
        assert_eq!(page.issues[0].project_id.as_deref(), Some("lp-1"));
        assert_eq!(page.issues[1].project_id, None);
    }

    #[test]
    fn test_last_page_has_no_cursor() {
        let body = json!({
            "data": {
                "issues": {
                    "nodes": [],
                    "pageInfo": { "hasNextPage": false, "endCursor": "cursor-9" }
                }
            }
        });
        assert_eq!(parse_issue_page(body).unwrap().next_cursor, None);
    }

    #[test]
    fn test_graphql_errors_are_classified() {
        let rejected = json!({
            "errors": [{ "message": "auth", "extensions": { "code": "AUTHENTICATION_ERROR" } }]
        });
        assert!(matches!(
            parse_issue_page(rejected),
            Err(SchedulerError::ExternalRejected(_))
        ));

        let limited = json!({
            "errors": [{ "message": "slow down", "extensions": { "code": "RATELIMITED" } }]
        });
        assert!(matches!(
            parse_issue_page(limited),
            Err(SchedulerError::ExternalTransient(_))
        ));
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::OK).is_none());
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED),
            Some(SchedulerError::ExternalRejected(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            Some(SchedulerError::ExternalRejected(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(SchedulerError::ExternalTransient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            Some(SchedulerError::ExternalTransient(_))
        ));
    }

    #[test]
    fn test_variables_filter_projects() {
        let all = LinearGraphqlClient::variables(&IssuePageRequest {
            project_ids: vec![],
            cursor: None,
            page_size: 50,
        });
        assert_eq!(all["filter"], Value::Null);
        assert_eq!(all["first"], 50);

        let filtered = LinearGraphqlClient::variables(&IssuePageRequest {
            project_ids: vec!["lp-1".to_string()],
            cursor: Some("c".to_string()),
            page_size: 10,
        });
        assert_eq!(filtered["filter"]["project"]["id"]["in"][0], "lp-1");
        assert_eq!(filtered["after"], "c");
    }
}
