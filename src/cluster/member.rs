use chrono::{DateTime, Utc};
use std::fmt;

/// Opaque cluster-wide unique identifier of one participant.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        MemberId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Member type, ordinal-ordered. The derived `Ord` follows declaration order,
/// which is what promote/demote walk on.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum MemberType {
    Inactive,
    Passive,
    Promotable,
    Active,
}

impl MemberType {
    pub fn next_higher(self) -> Option<MemberType> {
        match self {
            MemberType::Inactive => Some(MemberType::Passive),
            MemberType::Passive => Some(MemberType::Promotable),
            MemberType::Promotable => Some(MemberType::Active),
            MemberType::Active => None,
        }
    }

    pub fn next_lower(self) -> Option<MemberType> {
        match self {
            MemberType::Inactive => None,
            MemberType::Passive => Some(MemberType::Inactive),
            MemberType::Promotable => Some(MemberType::Passive),
            MemberType::Active => Some(MemberType::Promotable),
        }
    }

    pub(crate) fn persisted_name(self) -> &'static str {
        match self {
            MemberType::Inactive => "INACTIVE",
            MemberType::Passive => "PASSIVE",
            MemberType::Promotable => "PROMOTABLE",
            MemberType::Active => "ACTIVE",
        }
    }

    /// Decodes a persisted type name. The legacy BOOTSTRAP role is normalized
    /// to ACTIVE.
    pub(crate) fn from_persisted(name: &str) -> Option<MemberType> {
        match name {
            "INACTIVE" => Some(MemberType::Inactive),
            "PASSIVE" => Some(MemberType::Passive),
            "PROMOTABLE" => Some(MemberType::Promotable),
            "ACTIVE" => Some(MemberType::Active),
            "BOOTSTRAP" => Some(MemberType::Active),
            _ => None,
        }
    }
}

pub type TypeChangeListener = Box<dyn Fn(MemberType) + Send>;

/// One cluster participant: immutable identity plus mutable type. Listeners
/// registered here are invoked synchronously, in registration order, after a
/// type change lands.
pub struct Member {
    id: MemberId,
    member_type: MemberType,
    last_updated: DateTime<Utc>,
    type_change_listeners: Vec<TypeChangeListener>,
}

impl Member {
    pub(crate) fn new(id: MemberId, member_type: MemberType, last_updated: DateTime<Utc>) -> Self {
        Member {
            id,
            member_type,
            last_updated,
            type_change_listeners: Vec::new(),
        }
    }

    pub fn id(&self) -> &MemberId {
        &self.id
    }

    pub fn member_type(&self) -> MemberType {
        self.member_type
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn add_type_change_listener(&mut self, listener: TypeChangeListener) {
        self.type_change_listeners.push(listener);
    }

    /// Applies a type change only when the type differs, and advances
    /// `last_updated` only when `time` is strictly after the stored value.
    /// Out-of-order timestamps can never move the clock backward.
    pub(crate) fn update(&mut self, new_type: MemberType, time: DateTime<Utc>) {
        let type_changed = new_type != self.member_type;
        if type_changed {
            self.member_type = new_type;
        }
        if time > self.last_updated {
            self.last_updated = time;
        }

        if type_changed {
            for listener in &self.type_change_listeners {
                listener(new_type);
            }
        }
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Member({:?}, {:?})", self.id, self.member_type)
    }
}
