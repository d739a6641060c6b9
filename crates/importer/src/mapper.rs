use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, NaiveDate};
use serde_json::{json, Value};
use uuid::Uuid;

use scheduler_domain::{
    ImportParams, IssueStatus, LinearIssue, MismatchKind, NewImportMismatch, NewImportedIssue,
};

/// 待写入的冲突记录
#[derive(Debug, Clone, PartialEq)]
pub struct MismatchDraft {
    pub kind: MismatchKind,
    pub external_id: String,
    pub message: String,
    pub payload: Value,
}

impl MismatchDraft {
    pub fn new(
        kind: MismatchKind,
        external_id: impl Into<String>,
        message: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            external_id: external_id.into(),
            message: message.into(),
            payload,
        }
    }

    /// 同一任务内每种冲突对每个外部实体只记录一次
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.kind, self.external_id)
    }

    pub fn into_record(self, job_id: Uuid) -> NewImportMismatch {
        NewImportMismatch {
            job_id,
            mismatch_type: self.kind.as_str().to_string(),
            dedup_key: self.dedup_key(),
            message: self.message,
            payload: self.payload,
        }
    }
}

/// 单个外部工作项的映射结果
#[derive(Debug, Clone, PartialEq)]
pub enum IssueDecision {
    /// 写入本地, 附带不影响导入的冲突
    Import {
        issue: NewImportedIssue,
        warnings: Vec<MismatchDraft>,
    },
    /// 跳过该工作项
    Skip(MismatchDraft),
}

/// 本页映射目标在本地目录中的查询结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectorySnapshot {
    /// 已登记项目所属的工作区
    pub project_workspaces: HashMap<i64, i64>,
    /// 属于导入工作区的用户
    pub members: HashSet<i64>,
}

/// 本页工作项可能映射到的本地项目
pub fn mapped_project_ids(params: &ImportParams, issues: &[LinearIssue]) -> Vec<i64> {
    issues
        .iter()
        .filter_map(|issue| resolve_project(params, issue))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// 本页负责人可能对应的本地用户
pub fn mapped_user_ids(params: &ImportParams, issues: &[LinearIssue]) -> Vec<i64> {
    issues
        .iter()
        .filter_map(|issue| issue.assignee_email.as_deref())
        .filter_map(|email| resolve_user(params, email))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn resolve_project(params: &ImportParams, issue: &LinearIssue) -> Option<i64> {
    issue
        .project_id
        .as_ref()
        .and_then(|id| params.mappings.projects.get(id).copied())
        .or(params.default_project_id)
}

fn resolve_user(params: &ImportParams, email: &str) -> Option<i64> {
    params
        .mappings
        .users
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(email))
        .map(|(_, user_id)| *user_id)
}

/// 将外部工作项映射为本地记录
pub struct IssueMapper<'a> {
    params: &'a ImportParams,
    directory: &'a DirectorySnapshot,
    connection_id: i64,
    workspace_id: i64,
    job_id: Uuid,
}

impl<'a> IssueMapper<'a> {
    pub fn new(
        params: &'a ImportParams,
        directory: &'a DirectorySnapshot,
        connection_id: i64,
        workspace_id: i64,
        job_id: Uuid,
    ) -> Self {
        Self {
            params,
            directory,
            connection_id,
            workspace_id,
            job_id,
        }
    }

    pub fn map(&self, issue: &LinearIssue) -> IssueDecision {
        let title = issue.title.trim();
        if title.is_empty() {
            return IssueDecision::Skip(MismatchDraft::new(
                MismatchKind::InvalidIssue,
                &issue.id,
                format!("Linear工作项缺少标题: {}", display_id(issue)),
                json!({ "linearIssueId": issue.id, "identifier": issue.identifier }),
            ));
        }

        let project_id = match self.check_project(issue) {
            Ok(project_id) => project_id,
            Err(draft) => return IssueDecision::Skip(draft),
        };

        let mut warnings = Vec::new();
        let assignee_user_id = match issue.assignee_email.as_deref() {
            Some(email) => match resolve_user(self.params, email) {
                None => {
                    warnings.push(MismatchDraft::new(
                        MismatchKind::UnmatchedAssignee,
                        &issue.id,
                        format!("未找到与Linear负责人匹配的本地用户: {email}"),
                        json!({ "email": email, "linearIssueId": issue.id }),
                    ));
                    None
                }
                Some(user_id) if !self.directory.members.contains(&user_id) => {
                    warnings.push(MismatchDraft::new(
                        MismatchKind::AssigneeNotWorkspaceMember,
                        &issue.id,
                        format!("负责人 {email} 不是工作区 {} 的成员", self.workspace_id),
                        json!({
                            "email": email,
                            "userId": user_id,
                            "linearIssueId": issue.id,
                        }),
                    ));
                    None
                }
                Some(user_id) => Some(user_id),
            },
            None => None,
        };

        IssueDecision::Import {
            issue: NewImportedIssue {
                connection_id: self.connection_id,
                external_id: issue.id.clone(),
                workspace_id: self.workspace_id,
                project_id,
                title: title.to_string(),
                description: issue.description.clone(),
                status: map_state(issue.state_type.as_deref(), issue.state_name.as_deref()),
                priority: issue.priority,
                due_date: parse_due_date(issue.due_date.as_deref()),
                assignee_user_id,
                import_job_id: self.job_id,
            },
            warnings,
        }
    }

    /// 目标项目必须已映射、在本地存在且属于导入工作区
    fn check_project(&self, issue: &LinearIssue) -> Result<i64, MismatchDraft> {
        let Some(project_id) = resolve_project(self.params, issue) else {
            return Err(MismatchDraft::new(
                MismatchKind::UnmappedProject,
                &issue.id,
                format!(
                    "Linear项目未映射到本地项目: {}",
                    issue.project_id.as_deref().unwrap_or("<无项目>")
                ),
                json!({ "linearIssueId": issue.id, "linearProjectId": issue.project_id }),
            ));
        };

        let payload = json!({
            "linearIssueId": issue.id,
            "linearProjectId": issue.project_id,
            "projectId": project_id,
        });
        match self.directory.project_workspaces.get(&project_id) {
            None => Err(MismatchDraft::new(
                MismatchKind::MappedProjectNotFound,
                &issue.id,
                format!("映射的本地项目不存在: {project_id}"),
                payload,
            )),
            Some(&workspace_id) if workspace_id != self.workspace_id => Err(MismatchDraft::new(
                MismatchKind::MappedProjectWrongWorkspace,
                &issue.id,
                format!(
                    "映射的本地项目 {project_id} 不属于工作区 {}",
                    self.workspace_id
                ),
                payload,
            )),
            Some(_) => Ok(project_id),
        }
    }
}

fn display_id(issue: &LinearIssue) -> &str {
    issue.identifier.as_deref().unwrap_or(&issue.id)
}

/// 将Linear工作流状态映射为本地状态
///
/// 已知的状态类型直接映射; 其余情况下类型含complete或名称含done为done,
/// 类型含start或名称含progress为doing, 否则为todo。取消的工作项视为todo。
pub fn map_state(state_type: Option<&str>, state_name: Option<&str>) -> IssueStatus {
    let state_type = state_type.unwrap_or_default().to_lowercase();
    let state_name = state_name.unwrap_or_default().to_lowercase();

    match state_type.as_str() {
        "completed" => return IssueStatus::Done,
        "started" => return IssueStatus::Doing,
        "backlog" | "unstarted" | "triage" => return IssueStatus::Todo,
        _ => {}
    }

    if state_type.contains("complete") || state_name.contains("done") {
        IssueStatus::Done
    } else if state_type.contains("start") || state_name.contains("progress") {
        IssueStatus::Doing
    } else {
        IssueStatus::Todo
    }
}

/// 解析 `YYYY-MM-DD` 或RFC 3339格式的截止日期, 无法解析时忽略
pub fn parse_due_date(value: Option<&str>) -> Option<NaiveDate> {
    let value = value?.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_domain::ImportMappings;

    fn params() -> ImportParams {
        ImportParams {
            import_all: true,
            mappings: ImportMappings {
                projects: HashMap::from([("lp-1".to_string(), 100)]),
                users: HashMap::from([("Alice@Example.com".to_string(), 42)]),
            },
            ..Default::default()
        }
    }

    fn directory() -> DirectorySnapshot {
        DirectorySnapshot {
            project_workspaces: HashMap::from([(100, 7), (5, 7), (200, 8)]),
            members: HashSet::from([42]),
        }
    }

    fn issue(id: &str) -> LinearIssue {
        LinearIssue {
            id: id.to_string(),
            identifier: Some("ENG-1".to_string()),
            title: "Fix login".to_string(),
            description: None,
            priority: Some(2),
            due_date: Some("2026-03-01".to_string()),
            state_type: Some("started".to_string()),
            state_name: Some("In Progress".to_string()),
            assignee_email: Some("alice@example.com".to_string()),
            project_id: Some("lp-1".to_string()),
        }
    }

    #[test]
    fn test_maps_project_assignee_and_state() {
        let params = params();
        let directory = directory();
        let mapper = IssueMapper::new(&params, &directory, 1, 7, Uuid::new_v4());

        match mapper.map(&issue("iss-1")) {
            IssueDecision::Import { issue, warnings } => {
                assert_eq!(issue.project_id, 100);
                assert_eq!(issue.assignee_user_id, Some(42));
                assert_eq!(issue.status, IssueStatus::Doing);
                assert_eq!(issue.due_date, NaiveDate::from_ymd_opt(2026, 3, 1));
                assert!(warnings.is_empty());
            }
            other => panic!("expected import, got {other:?}"),
        }
    }

    #[test]
    fn test_unmapped_project_is_skipped_unless_default() {
        let params = params();
        let directory = directory();
        let mapper = IssueMapper::new(&params, &directory, 1, 7, Uuid::new_v4());
        let mut unmapped = issue("iss-2");
        unmapped.project_id = Some("lp-unknown".to_string());

        match mapper.map(&unmapped) {
            IssueDecision::Skip(draft) => {
                assert_eq!(draft.kind, MismatchKind::UnmappedProject);
                assert_eq!(draft.dedup_key(), "unmapped_project:iss-2");
            }
            other => panic!("expected skip, got {other:?}"),
        }

        let with_default = ImportParams {
            default_project_id: Some(5),
            ..params
        };
        let mapper = IssueMapper::new(&with_default, &directory, 1, 7, Uuid::new_v4());
        assert!(matches!(
            mapper.map(&unmapped),
            IssueDecision::Import { issue, .. } if issue.project_id == 5
        ));
    }

    #[test]
    fn test_unknown_assignee_imports_unassigned() {
        let params = params();
        let directory = directory();
        let mapper = IssueMapper::new(&params, &directory, 1, 7, Uuid::new_v4());
        let mut stranger = issue("iss-3");
        stranger.assignee_email = Some("ghost@example.com".to_string());

        match mapper.map(&stranger) {
            IssueDecision::Import { issue, warnings } => {
                assert_eq!(issue.assignee_user_id, None);
                assert_eq!(warnings.len(), 1);
                assert_eq!(warnings[0].kind, MismatchKind::UnmatchedAssignee);
            }
            other => panic!("expected import, got {other:?}"),
        }
    }

    #[test]
    fn test_mapped_project_must_exist_in_workspace() {
        let params = ImportParams {
            mappings: ImportMappings {
                projects: HashMap::from([
                    ("lp-1".to_string(), 100),
                    ("lp-gone".to_string(), 999),
                    ("lp-other".to_string(), 200),
                ]),
                users: HashMap::new(),
            },
            ..params()
        };
        let directory = directory();
        let mapper = IssueMapper::new(&params, &directory, 1, 7, Uuid::new_v4());

        let mut missing = issue("iss-5");
        missing.project_id = Some("lp-gone".to_string());
        match mapper.map(&missing) {
            IssueDecision::Skip(draft) => {
                assert_eq!(draft.kind, MismatchKind::MappedProjectNotFound);
                assert_eq!(draft.dedup_key(), "mapped_epic_project_not_found:iss-5");
            }
            other => panic!("expected skip, got {other:?}"),
        }

        let mut foreign = issue("iss-6");
        foreign.project_id = Some("lp-other".to_string());
        assert!(matches!(
            mapper.map(&foreign),
            IssueDecision::Skip(MismatchDraft {
                kind: MismatchKind::MappedProjectWrongWorkspace,
                ..
            })
        ));

        assert_eq!(
            mapped_project_ids(&params, &[missing, foreign, issue("iss-7")]),
            vec![100, 200, 999]
        );
    }

    #[test]
    fn test_assignee_outside_workspace_imports_unassigned() {
        let params = ImportParams {
            mappings: ImportMappings {
                projects: HashMap::from([("lp-1".to_string(), 100)]),
                users: HashMap::from([
                    ("alice@example.com".to_string(), 42),
                    ("bob@example.com".to_string(), 43),
                ]),
            },
            ..params()
        };
        let directory = directory();
        let mapper = IssueMapper::new(&params, &directory, 1, 7, Uuid::new_v4());
        let mut outsider = issue("iss-8");
        outsider.assignee_email = Some("Bob@Example.com".to_string());

        match mapper.map(&outsider) {
            IssueDecision::Import { issue, warnings } => {
                assert_eq!(issue.assignee_user_id, None);
                assert_eq!(warnings.len(), 1);
                assert_eq!(warnings[0].kind, MismatchKind::AssigneeNotWorkspaceMember);
                assert!(!warnings[0].kind.skips_entity());
            }
            other => panic!("expected import, got {other:?}"),
        }
        assert_eq!(mapped_user_ids(&params, &[outsider, issue("iss-9")]), vec![42, 43]);
    }

    #[test]
    fn test_blank_title_is_invalid() {
        let params = params();
        let directory = directory();
        let mapper = IssueMapper::new(&params, &directory, 1, 7, Uuid::new_v4());
        let mut blank = issue("iss-4");
        blank.title = "   ".to_string();

        assert!(matches!(
            mapper.map(&blank),
            IssueDecision::Skip(MismatchDraft { kind: MismatchKind::InvalidIssue, .. })
        ));
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(map_state(Some("completed"), Some("Done")), IssueStatus::Done);
        assert_eq!(map_state(Some("canceled"), Some("Canceled")), IssueStatus::Todo);
        assert_eq!(map_state(Some("cancelled"), Some("Duplicate")), IssueStatus::Todo);
        assert_eq!(map_state(Some("canceled"), Some("Won't do")), IssueStatus::Todo);
        assert_eq!(map_state(Some("started"), Some("In Review")), IssueStatus::Doing);
        assert_eq!(map_state(None, Some("In Progress")), IssueStatus::Doing);
        assert_eq!(map_state(Some("backlog"), Some("Backlog")), IssueStatus::Todo);
        assert_eq!(map_state(Some("unstarted"), Some("Todo")), IssueStatus::Todo);
        assert_eq!(map_state(Some("unstarted"), Some("In Progress")), IssueStatus::Todo);
        assert_eq!(map_state(None, Some("Done")), IssueStatus::Done);
        assert_eq!(map_state(None, None), IssueStatus::Todo);
    }

    #[test]
    fn test_due_date_parsing() {
        assert_eq!(
            parse_due_date(Some("2026-02-11")),
            NaiveDate::from_ymd_opt(2026, 2, 11)
        );
        assert_eq!(
            parse_due_date(Some("2026-02-11T10:00:00Z")),
            NaiveDate::from_ymd_opt(2026, 2, 11)
        );
        assert_eq!(parse_due_date(Some("not a date")), None);
        assert_eq!(parse_due_date(None), None);
    }
}
