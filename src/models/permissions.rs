use std::collections::BTreeSet;
use std::sync::OnceLock;

use async_graphql::{Enum, SimpleObject};
use serde::{Deserialize, Serialize};

use crate::error::{GavelError, GavelResult};

/// An atomic capability gating an admin panel or action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Enum, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    #[serde(alias = "manage_users")]
    ManageUsers,
    #[serde(alias = "manage_events")]
    ManageEvents,
    #[serde(alias = "manage_resources")]
    ManageResources,
    #[serde(alias = "manage_settings")]
    ManageSettings,
    #[serde(alias = "view_analytics")]
    ViewAnalytics,
    #[serde(alias = "manage_roles")]
    ManageRoles,
    #[serde(alias = "manage_permissions")]
    ManagePermissions,
}

impl Permission {
    pub const ALL: [Permission; 7] = [
        Permission::ManageUsers,
        Permission::ManageEvents,
        Permission::ManageResources,
        Permission::ManageSettings,
        Permission::ViewAnalytics,
        Permission::ManageRoles,
        Permission::ManagePermissions,
    ];

    /// Permissions that each unlock one of the CRUD panels.
    pub const MANAGEMENT: [Permission; 3] = [
        Permission::ManageUsers,
        Permission::ManageEvents,
        Permission::ManageResources,
    ];

    pub fn describe(self) -> PermissionInfo {
        let (name, description) = match self {
            Permission::ManageUsers => ("Manage Users", "Create, edit, and delete user accounts"),
            Permission::ManageEvents => ("Manage Events", "Create, edit, and delete events"),
            Permission::ManageResources => {
                ("Manage Resources", "Upload, edit, and delete resources")
            }
            Permission::ManageSettings => ("Manage Settings", "Configure system settings"),
            Permission::ViewAnalytics => ("View Analytics", "Access analytics and reports"),
            Permission::ManageRoles => ("Manage Roles", "Assign roles to members"),
            Permission::ManagePermissions => {
                ("Manage Permissions", "Grant individual permissions to members")
            }
        };

        PermissionInfo {
            permission: self,
            name: name.to_owned(),
            description: description.to_owned(),
        }
    }
}

/// A permission along with how it should be presented.
#[derive(SimpleObject, Clone, Debug)]
pub struct PermissionInfo {
    /// The permission being described
    pub permission: Permission,
    /// A short display name
    pub name: String,
    /// What holding the permission allows
    pub description: String,
}

/// A named bundle of permissions held by members.
#[derive(SimpleObject, Clone, Debug)]
pub struct Role {
    /// The identifier stored on user records, e.g. `vice_president`
    pub id: String,
    /// The display name of the role
    pub name: String,
    /// What the role is for
    pub description: String,
    /// The permissions every holder of the role is granted
    pub permissions: Vec<Permission>,
}

impl Role {
    pub const ADMIN: &'static str = "admin";
    pub const MEMBER: &'static str = "member";

    fn officer(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            description: description.to_owned(),
            permissions: Permission::ALL.to_vec(),
        }
    }

    pub fn all() -> &'static [Role] {
        &RoleTable::standard().roles
    }

    pub fn with_id(id: &str) -> Option<&'static Role> {
        Role::all().iter().find(|role| role.id == id)
    }
}

/// The static role table, validated when it is built.
pub struct RoleTable {
    roles: Vec<Role>,
}

impl RoleTable {
    pub fn new(roles: Vec<Role>) -> GavelResult<Self> {
        let mut seen = BTreeSet::new();
        for role in &roles {
            if !seen.insert(role.id.as_str()) {
                return Err(GavelError::Server(format!("duplicate role {}", role.id)));
            }
        }

        for required in [Role::ADMIN, Role::MEMBER] {
            if !seen.contains(required) {
                return Err(GavelError::Server(format!("missing role {}", required)));
            }
        }

        Ok(Self { roles })
    }

    fn chapter_officers() -> Vec<Role> {
        vec![
            Role::officer(Role::ADMIN, "Administrator", "Full system access"),
            Role::officer(
                "president",
                "President",
                "Chapter president with high-level management access",
            ),
            Role::officer(
                "vice_president",
                "Vice President",
                "Chapter vice president with management access",
            ),
            Role::officer(
                "secretary",
                "Secretary",
                "Chapter secretary with content management access",
            ),
            Role::officer(
                "treasurer",
                "Treasurer",
                "Chapter treasurer with financial management access",
            ),
            Role::officer(
                "reporter",
                "Reporter",
                "Chapter reporter with content creation access",
            ),
            Role {
                id: Role::MEMBER.to_owned(),
                name: "Member".to_owned(),
                description: "Regular chapter member".to_owned(),
                permissions: Vec::new(),
            },
        ]
    }

    pub fn standard() -> &'static RoleTable {
        static TABLE: OnceLock<RoleTable> = OnceLock::new();
        TABLE.get_or_init(|| {
            RoleTable::new(Self::chapter_officers()).expect("the chapter role table is valid")
        })
    }
}

/// Anything that carries a role and individually granted permissions.
pub trait Grantee {
    fn role(&self) -> &str;

    fn granted_permissions(&self) -> &[Permission];
}

/// The union of the permissions implied by the role and those granted directly.
pub fn effective_permissions(grantee: &impl Grantee) -> BTreeSet<Permission> {
    let from_role = Role::with_id(grantee.role())
        .map(|role| role.permissions.as_slice())
        .unwrap_or_default();

    from_role
        .iter()
        .chain(grantee.granted_permissions())
        .copied()
        .collect()
}

pub fn has_permission(grantee: &impl Grantee, permission: Permission) -> bool {
    grantee.granted_permissions().contains(&permission)
        || Role::with_id(grantee.role())
            .map(|role| role.permissions.contains(&permission))
            .unwrap_or(false)
}

pub fn has_all_permissions(grantee: &impl Grantee, permissions: &[Permission]) -> bool {
    permissions
        .iter()
        .all(|permission| has_permission(grantee, *permission))
}

pub fn has_any_permission(grantee: &impl Grantee, permissions: &[Permission]) -> bool {
    permissions
        .iter()
        .any(|permission| has_permission(grantee, *permission))
}

/// Whether the grantee may open the admin dashboard at all.
pub fn can_administer(grantee: &impl Grantee) -> bool {
    grantee.role() == Role::ADMIN || has_any_permission(grantee, &Permission::MANAGEMENT)
}

/// The management panels of the admin dashboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Enum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Panel {
    Events,
    Resources,
    Users,
    Settings,
    Analytics,
}

impl Panel {
    pub const ALL: [Panel; 5] = [
        Panel::Events,
        Panel::Resources,
        Panel::Users,
        Panel::Settings,
        Panel::Analytics,
    ];

    pub fn required_permission(self) -> Permission {
        match self {
            Panel::Events => Permission::ManageEvents,
            Panel::Resources => Permission::ManageResources,
            Panel::Users => Permission::ManageUsers,
            Panel::Settings => Permission::ManageSettings,
            Panel::Analytics => Permission::ViewAnalytics,
        }
    }

    pub fn visible_to(grantee: &impl Grantee) -> Vec<Panel> {
        Panel::ALL
            .into_iter()
            .filter(|panel| has_permission(grantee, panel.required_permission()))
            .collect()
    }
}
