//! Canonical property state owned by the engine.
//!
//! Only mutated while the engine lock is held. Each write stamps the
//! property with a new value of a global generation counter, which is what
//! observers compare against to decide whether a change is pending.

use std::collections::BTreeMap;

use crate::request::check_property_name;
use crate::{BusError, Format, Result, Value};

#[derive(Debug, Clone)]
struct Property {
    /// `None` while the property exists but is unavailable.
    value: Option<Value>,
    writable: bool,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct PropertyStore {
    entries: BTreeMap<String, Property>,
    generation: u64,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Declares (or redeclares) a property owned by the host.
    pub fn declare(&mut self, name: &str, initial: Option<Value>, writable: bool) -> Result<()> {
        check_property_name(name)?;
        let generation = self.bump();
        self.entries.insert(
            name.to_string(),
            Property {
                value: initial,
                writable,
                generation,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        let property = self.entries.get(name).ok_or(BusError::NotFound)?;
        property.value.as_ref().ok_or(BusError::Unavailable)
    }

    pub fn get_as(&self, name: &str, format: Format) -> Result<Value> {
        self.get(name)?.convert(format)
    }

    /// Writes a property on behalf of a client.
    ///
    /// Unknown names create a writable property. Existing properties keep
    /// the format of their current value; values that cannot be converted
    /// are rejected.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        check_property_name(name)?;
        match self.entries.get(name) {
            Some(property) if !property.writable => Err(BusError::SetFailed),
            Some(Property { value: None, .. }) => Err(BusError::Unavailable),
            _ => self.write(name, value),
        }
    }

    /// Writes a property as initial configuration. Writability is ignored
    /// and unavailable properties take the value as given; otherwise the
    /// established format is kept like [`PropertyStore::set`] does.
    pub fn configure(&mut self, name: &str, value: Value) -> Result<()> {
        check_property_name(name)?;
        self.write(name, value)
    }

    fn write(&mut self, name: &str, value: Value) -> Result<()> {
        let value = match self.entries.get(name).and_then(|p| p.value.as_ref()) {
            Some(current) => match current.format() {
                Format::None | Format::Node => value,
                format => value.convert(format)?,
            },
            None => value,
        };
        let generation = self.bump();
        let writable = self.entries.get(name).map_or(true, |p| p.writable);
        self.entries.insert(
            name.to_string(),
            Property {
                value: Some(value),
                writable,
                generation,
            },
        );
        Ok(())
    }

    /// Host-side update that ignores writability. `None` marks the property
    /// unavailable.
    pub fn update(&mut self, name: &str, value: Option<Value>) -> Result<()> {
        let generation = self.bump();
        let property = self.entries.get_mut(name).ok_or(BusError::NotFound)?;
        property.value = value;
        property.generation = generation;
        Ok(())
    }

    /// Generation of the last write to `name`, `0` if it never existed.
    pub fn generation_of(&self, name: &str) -> u64 {
        self.entries.get(name).map_or(0, |p| p.generation)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
