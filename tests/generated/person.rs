// @generated by schemabind. Do not edit by hand.

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Person {
    age: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address: Option<Box<Address>>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Person {
    pub const TYPE_URI: &'static str = "https://example.com/person.json";
    pub const NAME_DEFAULT: &'static str = "unknown";

    pub fn from_value(types: &schemabind::DescriptorSet, value: serde_json::Value) -> Result<Self, schemabind::ValidationError> {
        schemabind::from_checked(types, Self::TYPE_URI, value)
    }

    pub fn age(&self) -> &i64 {
        &self.age
    }

    pub fn set_age(&mut self, types: &schemabind::DescriptorSet, value: i64) -> Result<(), schemabind::ValidationError> {
        let mut next = self.clone();
        next.age = value;
        schemabind::check_serializable(types, Self::TYPE_URI, &next)?;
        *self = next;
        Ok(())
    }

    pub fn name(&self) -> &Option<String> {
        &self.name
    }

    pub fn set_name(&mut self, types: &schemabind::DescriptorSet, value: Option<String>) -> Result<(), schemabind::ValidationError> {
        let mut next = self.clone();
        next.name = value;
        schemabind::check_serializable(types, Self::TYPE_URI, &next)?;
        *self = next;
        Ok(())
    }

    pub fn address(&self) -> &Option<Box<Address>> {
        &self.address
    }

    pub fn set_address(&mut self, types: &schemabind::DescriptorSet, value: Option<Box<Address>>) -> Result<(), schemabind::ValidationError> {
        let mut next = self.clone();
        next.address = value;
        schemabind::check_serializable(types, Self::TYPE_URI, &next)?;
        *self = next;
        Ok(())
    }

    pub fn extra(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.extra
    }

    pub fn check(&self, types: &schemabind::DescriptorSet) -> Result<(), schemabind::ValidationError> {
        schemabind::check_serializable(types, Self::TYPE_URI, self)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    city: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Address {
    pub const TYPE_URI: &'static str = "https://example.com/person.json#/$defs/Address";

    pub fn from_value(types: &schemabind::DescriptorSet, value: serde_json::Value) -> Result<Self, schemabind::ValidationError> {
        schemabind::from_checked(types, Self::TYPE_URI, value)
    }

    pub fn city(&self) -> &Option<String> {
        &self.city
    }

    pub fn set_city(&mut self, types: &schemabind::DescriptorSet, value: Option<String>) -> Result<(), schemabind::ValidationError> {
        let mut next = self.clone();
        next.city = value;
        schemabind::check_serializable(types, Self::TYPE_URI, &next)?;
        *self = next;
        Ok(())
    }

    pub fn extra(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.extra
    }

    pub fn check(&self, types: &schemabind::DescriptorSet) -> Result<(), schemabind::ValidationError> {
        schemabind::check_serializable(types, Self::TYPE_URI, self)
    }
}
