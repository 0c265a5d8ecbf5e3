use std::collections::HashSet;

use crate::error::DuplicateIdentity;
use crate::server_types::Identity;

// Case-insensitive index of the usernames and colors currently claimed.
// Lives inside the registry lock so a check and its insert are one step.
#[derive(Debug, Default)]
pub struct Names {
    usernames: HashSet<String>,
    colors: HashSet<String>,
}

impl Names {
    pub fn new() -> Self {
        Names::default()
    }

    // Color is checked before username, so a candidate colliding on both
    // fields is always reported as a duplicate color.
    pub fn check(&self, identity: &Identity) -> Result<(), DuplicateIdentity> {
        if self.colors.contains(&fold(&identity.color)) {
            return Err(DuplicateIdentity::Color);
        }
        if self.usernames.contains(&fold(&identity.username)) {
            return Err(DuplicateIdentity::Username);
        }
        Ok(())
    }

    // Follows HashSet insert semantics, but reports which field collided
    pub fn insert(&mut self, identity: &Identity) -> Result<(), DuplicateIdentity> {
        self.check(identity)?;
        self.colors.insert(fold(&identity.color));
        self.usernames.insert(fold(&identity.username));
        Ok(())
    }

    pub fn remove(&mut self, identity: &Identity) {
        self.colors.remove(&fold(&identity.color));
        self.usernames.remove(&fold(&identity.username));
    }

    pub fn len(&self) -> usize {
        self.usernames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usernames.is_empty()
    }
}

fn fold(s: &str) -> String {
    s.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(username: &str, color: &str) -> Identity {
        Identity::new(username, color).unwrap()
    }

    #[test]
    fn duplicate_username_ignores_case() {
        let mut names = Names::new();
        names.insert(&id("ann", "red")).unwrap();
        assert_eq!(names.insert(&id("ANN", "blue")), Err(DuplicateIdentity::Username));
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn duplicate_color_ignores_case() {
        let mut names = Names::new();
        names.insert(&id("ann", "red")).unwrap();
        assert_eq!(names.insert(&id("bob", "Red")), Err(DuplicateIdentity::Color));
    }

    #[test]
    fn collision_on_both_reports_color() {
        let mut names = Names::new();
        names.insert(&id("ann", "red")).unwrap();
        assert_eq!(names.check(&id("Ann", "RED")), Err(DuplicateIdentity::Color));
    }

    #[test]
    fn remove_frees_both_fields() {
        let mut names = Names::new();
        let ann = id("ann", "red");
        names.insert(&ann).unwrap();
        names.remove(&ann);
        assert!(names.is_empty());
        assert!(names.insert(&id("Ann", "RED")).is_ok());
    }
}
