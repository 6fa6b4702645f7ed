use std::fmt;

/// Свойство окна, доступное через get/set по имени
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowProperty {
    X,
    Y,
    Width,
    Height,
    Name,
    Visible,
    Fullscreen,
}

/// Значение свойства окна
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Int(i32),
    UInt(u32),
    Text(String),
    Bool(bool),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::UInt(v) => write!(f, "{}", v),
            PropertyValue::Text(v) => write!(f, "{}", v),
            PropertyValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// Синонимы имён свойств. Одна операция - несколько имён.
const PROPERTY_NAMES: &[(&str, WindowProperty)] = &[
    ("x", WindowProperty::X),
    ("y", WindowProperty::Y),
    ("width", WindowProperty::Width),
    ("w", WindowProperty::Width),
    ("height", WindowProperty::Height),
    ("h", WindowProperty::Height),
    ("name", WindowProperty::Name),
    ("title", WindowProperty::Name),
    ("visible", WindowProperty::Visible),
    ("visible?", WindowProperty::Visible),
    ("shown", WindowProperty::Visible),
    ("fullscreen", WindowProperty::Fullscreen),
    ("fs", WindowProperty::Fullscreen),
];

/// Преобразование имён свойств окна в канонические свойства
pub struct PropertyNames;

impl PropertyNames {
    /// Получить свойство по имени или синониму
    pub fn translate(name: &str) -> Result<WindowProperty, String> {
        let normalized = name.trim().to_lowercase();
        PROPERTY_NAMES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, property)| *property)
            .ok_or_else(|| format!("Неизвестное свойство окна: {}", name))
    }

    /// Каноническое (первое) имя свойства
    pub fn canonical_name(property: WindowProperty) -> &'static str {
        PROPERTY_NAMES
            .iter()
            .find(|(_, p)| *p == property)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// Все синонимы свойства
    pub fn aliases(property: WindowProperty) -> Vec<&'static str> {
        PROPERTY_NAMES
            .iter()
            .filter(|(_, p)| *p == property)
            .map(|(name, _)| *name)
            .collect()
    }

    /// Разобрать строковое значение для свойства
    pub fn parse_value(property: WindowProperty, raw: &str) -> Result<PropertyValue, String> {
        let raw = raw.trim();
        match property {
            WindowProperty::X | WindowProperty::Y => raw
                .parse::<i32>()
                .map(PropertyValue::Int)
                .map_err(|e| format!("Неверное значение координаты '{}': {}", raw, e)),
            WindowProperty::Width | WindowProperty::Height => raw
                .parse::<u32>()
                .map(PropertyValue::UInt)
                .map_err(|e| format!("Неверное значение размера '{}': {}", raw, e)),
            WindowProperty::Name => Ok(PropertyValue::Text(raw.to_string())),
            WindowProperty::Visible | WindowProperty::Fullscreen => {
                match raw.to_lowercase().as_str() {
                    "true" | "yes" | "on" | "1" => Ok(PropertyValue::Bool(true)),
                    "false" | "no" | "off" | "0" => Ok(PropertyValue::Bool(false)),
                    _ => Err(format!("Неверное логическое значение '{}'", raw)),
                }
            }
        }
    }

    /// Разобрать пару вида `name=value`
    pub fn parse_assignment(assignment: &str) -> Result<(WindowProperty, PropertyValue), String> {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| format!("Ожидалось NAME=VALUE, получено '{}'", assignment))?;
        let property = Self::translate(name)?;
        let value = Self::parse_value(property, value)?;
        Ok((property, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synonyms_resolve_to_one_property() {
        assert_eq!(PropertyNames::translate("width").unwrap(), WindowProperty::Width);
        assert_eq!(PropertyNames::translate("w").unwrap(), WindowProperty::Width);
        assert_eq!(PropertyNames::translate("H").unwrap(), WindowProperty::Height);
        assert_eq!(PropertyNames::translate("title").unwrap(), WindowProperty::Name);
        assert_eq!(PropertyNames::translate("visible?").unwrap(), WindowProperty::Visible);
    }

    #[test]
    fn test_unknown_property() {
        assert!(PropertyNames::translate("depth").is_err());
    }

    #[test]
    fn test_canonical_name_and_aliases() {
        assert_eq!(PropertyNames::canonical_name(WindowProperty::Width), "width");
        assert_eq!(PropertyNames::aliases(WindowProperty::Name), vec!["name", "title"]);
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            PropertyNames::parse_assignment("w=800").unwrap(),
            (WindowProperty::Width, PropertyValue::UInt(800))
        );
        assert_eq!(
            PropertyNames::parse_assignment("x=-20").unwrap(),
            (WindowProperty::X, PropertyValue::Int(-20))
        );
        assert_eq!(
            PropertyNames::parse_assignment("fullscreen=on").unwrap(),
            (WindowProperty::Fullscreen, PropertyValue::Bool(true))
        );
        assert!(PropertyNames::parse_assignment("height=-1").is_err());
        assert!(PropertyNames::parse_assignment("height").is_err());
    }
}
