use crate::{
    error::{Result, StoreError},
    types::{Document, Fields},
};
use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{AsRefStr, Display as StrumDisplay, EnumString};

/// What a user may do: customers shop, sellers manage the catalog and their orders.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserType {
    #[default]
    Client,
    Seller,
}

/// An authenticated actor: a customer or a seller. Profiles live in the `users` collection; the fields beyond
/// identity, email and role are optional there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(skip)]
    #[garde(length(min = 1))]
    pub id:         String,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub name:       String,
    #[serde(default)]
    #[garde(length(min = 3), contains("@"))]
    pub email:      String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub phone:      Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub address:    Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub store_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub avatar:     Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub user_type:  UserType,
}

impl User {
    /// A customer profile.
    pub fn new<I, N, E>(id: I, name: N, email: E) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        E: Into<String>,
    {
        Self {
            id:         id.into(),
            name:       name.into(),
            email:      email.into(),
            phone:      None,
            address:    None,
            store_name: None,
            avatar:     None,
            user_type:  UserType::Client,
        }
    }

    /// A seller profile running `store_name`.
    pub fn seller<I, N, E, S>(id: I, name: N, email: E, store_name: S) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        E: Into<String>,
        S: Into<String>,
    {
        Self {
            store_name: Some(store_name.into()),
            user_type: UserType::Seller,
            ..Self::new(id, name, email)
        }
    }

    pub fn with_phone<S: Into<String>>(mut self, phone: S) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_address<S: Into<String>>(mut self, address: S) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn from_document(doc: &Document) -> Result<User> {
        let mut user: User = serde_json::from_value(doc.data.clone()).map_err(|e| StoreError::MalformedDocument {
            id:      doc.id.clone(),
            message: e.to_string(),
        })?;
        user.id = doc.id.clone();
        user.phone = user.phone.filter(|p| !p.is_empty());
        user.address = user.address.filter(|a| !a.is_empty());
        user.store_name = user.store_name.filter(|s| !s.is_empty());
        user.avatar = user.avatar.filter(|a| !a.is_empty());
        Ok(user)
    }

    /// Stored representation of the profile, without its identity. Empty optional fields are written as empty
    /// strings, the way profiles are created.
    pub fn to_data(&self) -> Result<Value> {
        let mut data = serde_json::to_value(self)?;
        if let Value::Object(ref mut fields) = data {
            fields
                .entry("storeName")
                .or_insert_with(|| Value::String(String::new()));
        }
        Ok(data)
    }

    /// Validate a profile before it is stored. Sellers need a store name.
    pub fn check_profile(&self) -> Result<()> {
        self.validate()?;
        if self.is_seller() && self.store_name.as_deref().is_none_or(|s| s.trim().is_empty()) {
            return Err(StoreError::Validation("store name is required for sellers".to_string()));
        }
        Ok(())
    }

    pub fn is_seller(&self) -> bool {
        self.user_type == UserType::Seller
    }

    pub(crate) fn apply_patch(&mut self, patch: &ProfilePatch) {
        if let Some(ref name) = patch.name {
            self.name = name.clone();
        }
        if let Some(ref phone) = patch.phone {
            self.phone = Some(phone.clone()).filter(|p| !p.is_empty());
        }
        if let Some(ref address) = patch.address {
            self.address = Some(address.clone()).filter(|a| !a.is_empty());
        }
        if let Some(ref store_name) = patch.store_name {
            self.store_name = Some(store_name.clone()).filter(|s| !s.is_empty());
        }
        if let Some(ref avatar) = patch.avatar {
            self.avatar = Some(avatar.clone()).filter(|a| !a.is_empty());
        }
    }
}

/// Partial profile update; `None` leaves a field unchanged, an empty string clears an optional one. Identity, email
/// and role are not changed this way.
#[derive(Debug, Clone, Default, Validate)]
pub struct ProfilePatch {
    #[garde(length(min = 1))]
    pub name:       Option<String>,
    #[garde(skip)]
    pub phone:      Option<String>,
    #[garde(skip)]
    pub address:    Option<String>,
    #[garde(skip)]
    pub store_name: Option<String>,
    #[garde(skip)]
    pub avatar:     Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.phone.is_none()
            && self.address.is_none()
            && self.store_name.is_none()
            && self.avatar.is_none()
    }

    /// The stored fields this patch changes.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        let changes = [
            ("name", &self.name),
            ("phone", &self.phone),
            ("address", &self.address),
            ("storeName", &self.store_name),
            ("avatar", &self.avatar),
        ];
        for (key, value) in changes {
            if let Some(value) = value {
                fields.insert(key.to_string(), json!(value));
            }
        }
        fields
    }
}
