//! Mapping of raw directory attributes onto a [`UserIdentity`].

use std::collections::HashMap;

use crate::identity::{GroupMembership, Login, UserIdentity};

pub const MAIL: &str = "mail";
pub const SITE_ID: &str = "uidNumber";
pub const FAMILY_NAME: &str = "sn";
pub const GIVEN_NAME: &str = "givenName";
pub const PHONE: &str = "telephoneNumber";
pub const MEMBER_OF: &str = "memberOf";

/// Attributes requested on every user search.
pub const REQUESTED: [&str; 6] =
    [MAIL, SITE_ID, FAMILY_NAME, GIVEN_NAME, PHONE, MEMBER_OF];

/// Attributes of one directory entry.
///
/// Names are matched ignoring ASCII case, values are kept verbatim and in
/// server order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryAttributeSet {
    attrs: HashMap<String, Vec<String>>,
    bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryAttributeSet {
    /// Create a new [`DirectoryAttributeSet`].
    pub fn new(
        attrs: HashMap<String, Vec<String>>,
        bin_attrs: HashMap<String, Vec<Vec<u8>>>,
    ) -> Self {
        Self { attrs, bin_attrs }
    }

    /// Every value of `name`, binary values decoded lossily.
    pub fn values(&self, name: &str) -> Option<Vec<String>> {
        if let Some(values) = lookup(&self.attrs, name) {
            return Some(values.clone());
        }

        lookup(&self.bin_attrs, name).map(|values| {
            values
                .iter()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .collect()
        })
    }

    /// First value of `name`.
    pub fn first(&self, name: &str) -> Option<String> {
        self.values(name).and_then(|values| values.into_iter().next())
    }

    /// Raw bytes of `name`, text values included.
    pub fn raw_values(&self, name: &str) -> Option<Vec<Vec<u8>>> {
        if let Some(values) = lookup(&self.bin_attrs, name) {
            return Some(values.clone());
        }

        lookup(&self.attrs, name)
            .map(|values| values.iter().map(|v| v.as_bytes().to_vec()).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        lookup(&self.attrs, name).is_some()
            || lookup(&self.bin_attrs, name).is_some()
    }
}

impl From<HashMap<String, Vec<String>>> for DirectoryAttributeSet {
    fn from(attrs: HashMap<String, Vec<String>>) -> Self {
        Self {
            attrs,
            bin_attrs: HashMap::new(),
        }
    }
}

impl From<ldap3::SearchEntry> for DirectoryAttributeSet {
    fn from(entry: ldap3::SearchEntry) -> Self {
        Self::new(entry.attrs, entry.bin_attrs)
    }
}

fn lookup<'a, V>(map: &'a HashMap<String, V>, name: &str) -> Option<&'a V> {
    map.get(name).or_else(|| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values)
    })
}

/// Build the identity and the groups of `login` from its directory entry.
///
/// Absent attributes leave the field empty; this never fails.
pub fn map_attributes(
    login: &Login,
    attrs: &DirectoryAttributeSet,
) -> (UserIdentity, GroupMembership) {
    let identity = UserIdentity {
        login: login.as_str().to_owned(),
        email_address: attrs.first(MAIL),
        site_id: attrs.first(SITE_ID),
        family_name: attrs.first(FAMILY_NAME),
        given_name: attrs.first(GIVEN_NAME),
        phone_number: attrs.first(PHONE),
    };
    let groups = GroupMembership::new(attrs.values(MEMBER_OF).unwrap_or_default());

    (identity, groups)
}
