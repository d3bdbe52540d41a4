use std::path::PathBuf;

use super::definition::UserDefinition;

/// An account inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub identity: Option<PathBuf>,
    pub public_identity: Option<PathBuf>,
}

impl User {
    pub fn home_dir(&self) -> PathBuf {
        if self.username == "root" {
            PathBuf::from("/root")
        } else {
            PathBuf::from("/home").join(&self.username)
        }
    }
}

impl From<&UserDefinition> for User {
    fn from(def: &UserDefinition) -> Self {
        Self {
            username: def.username.clone(),
            password: def.password.clone(),
            uid: def.uid,
            gid: def.gid,
            identity: def.identity.clone(),
            public_identity: def.public_identity.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_dir() {
        let mut user = User::from(&UserDefinition {
            username: "deployer".to_string(),
            ..Default::default()
        });
        assert_eq!(user.home_dir(), PathBuf::from("/home/deployer"));

        user.username = "root".to_string();
        assert_eq!(user.home_dir(), PathBuf::from("/root"));
    }
}
