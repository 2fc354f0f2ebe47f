use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize, ToSchema, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Admin = 1,
    Manager = 2,
    #[default]
    Employee = 3,
}

impl Role {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::Manager),
            3 => Some(Role::Employee),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Managers and admins may supervise other users' records.
    pub fn can_manage(self) -> bool {
        matches!(self, Role::Manager | Role::Admin)
    }

    pub fn can_administer(self) -> bool {
        self == Role::Admin
    }
}

impl TryFrom<String> for Role {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for role in [Role::Admin, Role::Manager, Role::Employee] {
            assert_eq!(Role::from_id(role.id()), Some(role));
        }
        assert_eq!(Role::from_id(0), None);
        assert_eq!(Role::from_id(4), None);
    }

    #[test]
    fn capabilities_follow_the_role_tier() {
        assert!(Role::Admin.can_manage());
        assert!(Role::Admin.can_administer());
        assert!(Role::Manager.can_manage());
        assert!(!Role::Manager.can_administer());
        assert!(!Role::Employee.can_manage());
    }

    #[test]
    fn parses_stored_names() {
        assert_eq!(Role::try_from("manager".to_string()), Ok(Role::Manager));
        assert!(Role::try_from("hr".to_string()).is_err());
        assert_eq!(Role::Employee.as_ref(), "employee");
    }
}
