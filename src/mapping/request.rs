//! Filling entities from key/value sources such as submitted form fields.

use crate::error::{DbError, DbResult};
use crate::mapping::entity::AnyEntity;
use crate::mapping::field::ValueKind;
use std::collections::{BTreeMap, HashMap};

/// Lookup of raw text values by key.
pub trait ValueSource {
    fn value(&self, key: &str) -> Option<&str>;
}

impl ValueSource for HashMap<String, String> {
    fn value(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

impl ValueSource for BTreeMap<String, String> {
    fn value(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

impl ValueSource for [(&str, &str)] {
    fn value(&self, key: &str) -> Option<&str> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }
}

impl<S: ValueSource + ?Sized> ValueSource for &S {
    fn value(&self, key: &str) -> Option<&str> {
        (**self).value(key)
    }
}

/// Fill the loadable members of `entity` from `source`.
///
/// Each member is looked up by its key name (member name unless overridden).
/// When a key is absent: `allow_missing` members keep their value,
/// `empty_if_missing` strings become "", booleans become false, and anything
/// else is a `KeyNotFound` error if `missing_is_error`, otherwise skipped.
/// Empty text resets non-string members to their default; values that fail
/// to convert leave the member untouched.
pub fn fill_from_source(
    entity: &mut dyn AnyEntity,
    source: &dyn ValueSource,
    missing_is_error: bool,
) -> DbResult<()> {
    let description = entity.description();
    let target = entity.as_any_mut();

    for field in description.fields() {
        if !field.is_loadable() {
            continue;
        }
        let flags = field.flags();
        let is_string = field.kind() == Some(ValueKind::String);

        let text = match source.value(field.key()) {
            Some(text) => text,
            None if flags.allow_missing && !is_string => continue,
            None if flags.empty_if_missing && is_string => "",
            None if field.kind() == Some(ValueKind::Bool) => "",
            None if missing_is_error => return Err(DbError::key_not_found(field.key())),
            None => continue,
        };

        let text = if flags.trim { text.trim() } else { text };
        if text.is_empty() && !is_string {
            field.reset(target);
        } else {
            field.set_text(target, text);
        }
    }
    Ok(())
}

/// Lenient form binding: keys are `name_prefix + member name` unless a key
/// name is set, and absent keys are skipped.
pub fn fill_from_form(entity: &mut dyn AnyEntity, source: &dyn ValueSource, name_prefix: &str) {
    let description = entity.description();
    let target = entity.as_any_mut();

    for field in description.fields() {
        if !field.is_loadable() {
            continue;
        }
        let key = match &field.key_name {
            Some(key) => key.clone(),
            None => format!("{}{}", name_prefix, field.name()),
        };
        if let Some(text) = source.value(&key) {
            let text = if field.flags().trim { text.trim() } else { text };
            field.set_text(target, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{Entity, FieldRegistry};

    #[derive(Debug, Default)]
    struct SignUp {
        user_name: String,
        age: i32,
        nick: String,
        agree: bool,
        code: String,
        retries: i32,
    }

    impl Entity for SignUp {
        fn register(fields: &mut FieldRegistry<Self>) {
            fields.field("UserName", |s| &s.user_name, |s| &mut s.user_name);
            fields
                .field("Age", |s| &s.age, |s| &mut s.age)
                .allow_missing();
            fields
                .field("Nick", |s| &s.nick, |s| &mut s.nick)
                .empty_if_missing();
            fields.field("Agree", |s| &s.agree, |s| &mut s.agree);
            fields
                .field("Code", |s| &s.code, |s| &mut s.code)
                .key("c")
                .keep_whitespace();
            fields
                .field("Retries", |s| &s.retries, |s| &mut s.retries)
                .allow_missing();
        }
    }

    #[test]
    fn test_missing_keys_follow_flags() {
        let source: &[(&str, &str)] = &[("UserName", "  alice "), ("c", " x "), ("Retries", "n/a")];
        let mut item = SignUp {
            age: 30,
            nick: "old".into(),
            agree: true,
            retries: 3,
            ..SignUp::default()
        };
        fill_from_source(&mut item, &source, true).unwrap();
        assert_eq!(item.user_name, "alice");
        assert_eq!(item.age, 30);
        assert_eq!(item.nick, "");
        assert!(!item.agree);
        assert_eq!(item.code, " x ");
        assert_eq!(item.retries, 3);
    }

    #[test]
    fn test_missing_required_key() {
        let source: HashMap<String, String> = HashMap::new();
        let mut item = SignUp::default();
        let err = fill_from_source(&mut item, &source, true).unwrap_err();
        assert!(matches!(err, DbError::KeyNotFound { ref key } if key == "UserName"));
        assert!(fill_from_source(&mut item, &source, false).is_ok());
    }

    #[test]
    fn test_form_prefix() {
        let mut source = BTreeMap::new();
        source.insert("a.UserName".to_string(), "bob".to_string());
        source.insert("a.Age".to_string(), "41".to_string());
        let mut item = SignUp::default();
        fill_from_form(&mut item, &source, "a.");
        assert_eq!(item.user_name, "bob");
        assert_eq!(item.age, 41);
    }
}
