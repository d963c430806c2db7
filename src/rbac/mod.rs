//! Role-based access control.
//!
//! The role table is closed and compiled in. Looking up a role outside it is an
//! error (`UnknownRole`), never an empty grant.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AuthError;
use crate::store::SharedStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Attorney,
    Paralegal,
    CaseManager,
    Intake,
    ReadOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, ToSchema)]
pub enum Permission {
    #[serde(rename = "cases.read")]
    CasesRead,
    #[serde(rename = "cases.write")]
    CasesWrite,
    #[serde(rename = "cases.delete")]
    CasesDelete,
    #[serde(rename = "documents.read")]
    DocumentsRead,
    #[serde(rename = "documents.write")]
    DocumentsWrite,
    #[serde(rename = "notes.read")]
    NotesRead,
    #[serde(rename = "notes.write")]
    NotesWrite,
    #[serde(rename = "tasks.manage")]
    TasksManage,
    #[serde(rename = "negotiations.read")]
    NegotiationsRead,
    #[serde(rename = "negotiations.write")]
    NegotiationsWrite,
    #[serde(rename = "templates.manage")]
    TemplatesManage,
    #[serde(rename = "reports.view")]
    ReportsView,
    #[serde(rename = "portal.manage")]
    PortalManage,
    #[serde(rename = "mail.send")]
    MailSend,
    #[serde(rename = "users.manage")]
    UsersManage,
    #[serde(rename = "settings.manage")]
    SettingsManage,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::Attorney,
        Role::Paralegal,
        Role::CaseManager,
        Role::Intake,
        Role::ReadOnly,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Attorney => "attorney",
            Self::Paralegal => "paralegal",
            Self::CaseManager => "case_manager",
            Self::Intake => "intake",
            Self::ReadOnly => "read_only",
        }
    }

    /// Permissions granted to this role.
    #[must_use]
    pub fn permissions(self) -> &'static [Permission] {
        use Permission::{
            CasesDelete, CasesRead, CasesWrite, DocumentsRead, DocumentsWrite, MailSend,
            NegotiationsRead, NegotiationsWrite, NotesRead, NotesWrite, PortalManage, ReportsView,
            SettingsManage, TasksManage, TemplatesManage, UsersManage,
        };
        match self {
            Self::Admin => &Permission::ALL,
            Self::Attorney => &[
                CasesRead,
                CasesWrite,
                CasesDelete,
                DocumentsRead,
                DocumentsWrite,
                NotesRead,
                NotesWrite,
                TasksManage,
                NegotiationsRead,
                NegotiationsWrite,
                TemplatesManage,
                ReportsView,
                PortalManage,
                MailSend,
            ],
            Self::Paralegal => &[
                CasesRead,
                CasesWrite,
                DocumentsRead,
                DocumentsWrite,
                NotesRead,
                NotesWrite,
                TasksManage,
                NegotiationsRead,
                PortalManage,
                MailSend,
            ],
            Self::CaseManager => &[
                CasesRead,
                CasesWrite,
                DocumentsRead,
                DocumentsWrite,
                NotesRead,
                NotesWrite,
                TasksManage,
                NegotiationsRead,
                NegotiationsWrite,
                ReportsView,
                PortalManage,
                MailSend,
            ],
            Self::Intake => &[CasesRead, CasesWrite, DocumentsRead, NotesRead, NotesWrite],
            Self::ReadOnly => &[CasesRead, DocumentsRead, NotesRead, NegotiationsRead],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| AuthError::UnknownRole(value.trim().to_string()))
    }
}

impl Permission {
    pub const ALL: [Permission; 16] = [
        Permission::CasesRead,
        Permission::CasesWrite,
        Permission::CasesDelete,
        Permission::DocumentsRead,
        Permission::DocumentsWrite,
        Permission::NotesRead,
        Permission::NotesWrite,
        Permission::TasksManage,
        Permission::NegotiationsRead,
        Permission::NegotiationsWrite,
        Permission::TemplatesManage,
        Permission::ReportsView,
        Permission::PortalManage,
        Permission::MailSend,
        Permission::UsersManage,
        Permission::SettingsManage,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CasesRead => "cases.read",
            Self::CasesWrite => "cases.write",
            Self::CasesDelete => "cases.delete",
            Self::DocumentsRead => "documents.read",
            Self::DocumentsWrite => "documents.write",
            Self::NotesRead => "notes.read",
            Self::NotesWrite => "notes.write",
            Self::TasksManage => "tasks.manage",
            Self::NegotiationsRead => "negotiations.read",
            Self::NegotiationsWrite => "negotiations.write",
            Self::TemplatesManage => "templates.manage",
            Self::ReportsView => "reports.view",
            Self::PortalManage => "portal.manage",
            Self::MailSend => "mail.send",
            Self::UsersManage => "users.manage",
            Self::SettingsManage => "settings.manage",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a role identifier into its permission set.
///
/// # Errors
/// `UnknownRole` when the identifier is not in the role table.
pub fn get_permissions(role: &str) -> Result<BTreeSet<Permission>, AuthError> {
    let role: Role = role.parse()?;
    Ok(role.permissions().iter().copied().collect())
}

/// A staff member with their resolved grants.
#[derive(Clone, Debug)]
pub struct MemberPermissions {
    pub member_id: Uuid,
    pub name: String,
    pub role: Role,
    pub permissions: BTreeSet<Permission>,
}

/// Resolves stored staff roles through the static table.
#[derive(Clone)]
pub struct PermissionResolver {
    store: SharedStore,
}

impl PermissionResolver {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// # Errors
    /// `NotFound` for an unknown member, `UnknownRole` when the stored role is not
    /// in the table, `Datastore` on storage failure.
    pub async fn get_member_permissions(
        &self,
        staff_member_id: Uuid,
    ) -> Result<MemberPermissions, AuthError> {
        let member = self
            .store
            .get_staff_member(staff_member_id)
            .await
            .map_err(AuthError::datastore)?
            .ok_or(AuthError::NotFound("staff member"))?;
        let role: Role = member.role.parse()?;
        Ok(MemberPermissions {
            member_id: member.id,
            name: member.name,
            role,
            permissions: role.permissions().iter().copied().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use anyhow::Result;
    use std::sync::Arc;

    #[test]
    fn every_role_round_trips_and_grants_something() -> Result<()> {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>()?, role);
            assert!(!role.permissions().is_empty());
        }
        Ok(())
    }

    #[test]
    fn admin_holds_every_permission() -> Result<()> {
        let admin = get_permissions("admin")?;
        assert_eq!(admin.len(), Permission::ALL.len());
        Ok(())
    }

    #[test]
    fn roles_parse_case_insensitively() -> Result<()> {
        assert_eq!(" Attorney ".parse::<Role>()?, Role::Attorney);
        Ok(())
    }

    #[test]
    fn unknown_role_is_an_error_not_an_empty_set() {
        match get_permissions("janitor") {
            Err(AuthError::UnknownRole(role)) => assert_eq!(role, "janitor"),
            other => panic!("expected UnknownRole, got {other:?}"),
        }
        assert!(matches!(get_permissions(""), Err(AuthError::UnknownRole(_))));
    }

    #[test]
    fn read_only_cannot_write() -> Result<()> {
        let grants = get_permissions("read_only")?;
        assert!(grants.contains(&Permission::CasesRead));
        assert!(!grants.contains(&Permission::CasesWrite));
        assert!(!grants.contains(&Permission::UsersManage));
        Ok(())
    }

    #[test]
    fn permission_identifiers_match_serde_names() -> Result<()> {
        for permission in Permission::ALL {
            let json = serde_json::to_value(permission)?;
            assert_eq!(json, permission.as_str());
        }
        Ok(())
    }

    #[tokio::test]
    async fn member_permissions_follow_stored_role() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let paralegal = store
            .add_staff_member("Pat Lee", "pat@firm.example", "paralegal")
            .await;
        let resolver = PermissionResolver::new(store.clone());

        let resolved = resolver.get_member_permissions(paralegal.id).await?;
        assert_eq!(resolved.role, Role::Paralegal);
        assert_eq!(resolved.name, "Pat Lee");
        assert!(resolved.permissions.contains(&Permission::DocumentsWrite));
        assert!(resolved.permissions.contains(&Permission::MailSend));
        assert!(!resolved.permissions.contains(&Permission::UsersManage));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_member_and_unknown_stored_role() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let odd = store
            .add_staff_member("Odd Role", "odd@firm.example", "superuser")
            .await;
        let resolver = PermissionResolver::new(store.clone());

        assert!(matches!(
            resolver.get_member_permissions(Uuid::new_v4()).await,
            Err(AuthError::NotFound(_))
        ));
        assert!(matches!(
            resolver.get_member_permissions(odd.id).await,
            Err(AuthError::UnknownRole(_))
        ));
        Ok(())
    }
}
