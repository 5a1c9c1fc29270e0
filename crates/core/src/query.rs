use std::cmp::Ordering;

use crate::field_value::FieldValue;
use crate::record::{Model, Record};

static NULL: FieldValue = FieldValue::Null;

/// Filter over a record's fields. A missing field compares as `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, FieldValue),
    Ne(String, FieldValue),
    Lt(String, FieldValue),
    Le(String, FieldValue),
    Gt(String, FieldValue),
    Ge(String, FieldValue),
    /// Case-sensitive substring match on a text field.
    Contains(String, String),
    IsNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Eq(key.into(), value.into())
    }

    pub fn ne(key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Ne(key.into(), value.into())
    }

    pub fn lt(key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Lt(key.into(), value.into())
    }

    pub fn gt(key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Gt(key.into(), value.into())
    }

    pub fn contains(key: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains(key.into(), needle.into())
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut all) => {
                all.push(other);
                Self::And(all)
            }
            this => Self::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut any) => {
                any.push(other);
                Self::Or(any)
            }
            this => Self::Or(vec![this, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn matches(&self, record: &Record) -> bool {
        let field = |key: &str| record.get(key).unwrap_or(&NULL);
        match self {
            Self::Eq(key, value) => compare(field(key), value) == Some(Ordering::Equal),
            Self::Ne(key, value) => compare(field(key), value) != Some(Ordering::Equal),
            Self::Lt(key, value) => compare(field(key), value) == Some(Ordering::Less),
            Self::Le(key, value) => matches!(
                compare(field(key), value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Gt(key, value) => compare(field(key), value) == Some(Ordering::Greater),
            Self::Ge(key, value) => matches!(
                compare(field(key), value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Contains(key, needle) => field(key)
                .as_text()
                .is_some_and(|text| text.contains(needle.as_str())),
            Self::IsNull(key) => field(key).is_null(),
            Self::And(all) => all.iter().all(|p| p.matches(record)),
            Self::Or(any) => any.iter().any(|p| p.matches(record)),
            Self::Not(inner) => !inner.matches(record),
        }
    }
}

/// Ordering between two values of comparable kinds; `None` when the kinds differ.
/// Null sorts before everything else.
fn compare(a: &FieldValue, b: &FieldValue) -> Option<Ordering> {
    use FieldValue::*;
    match (a, b) {
        (Null, Null) => Some(Ordering::Equal),
        (Null, _) => Some(Ordering::Less),
        (_, Null) => Some(Ordering::Greater),
        (Text(x), Text(y)) => Some(x.cmp(y)),
        (Integer(x), Integer(y)) => Some(x.cmp(y)),
        (Float(x), Float(y)) => Some(x.total_cmp(y)),
        (Integer(x), Float(y)) => Some((*x as f64).total_cmp(y)),
        (Float(x), Integer(y)) => Some(x.total_cmp(&(*y as f64))),
        (Boolean(x), Boolean(y)) => Some(x.cmp(y)),
        (Timestamp(x), Timestamp(y)) => Some(x.cmp(y)),
        (Ref(x), Ref(y)) => Some(x.cmp(y)),
        (Bytes(x), Bytes(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub key: String,
    pub ascending: bool,
}

/// Fetch request against one entity: filter, then sort, then offset and limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub entity: String,
    pub predicate: Option<Predicate>,
    pub sort: Vec<SortDescriptor>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: None,
            sort: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    pub fn of<M: Model>() -> Self {
        Self::new(M::ENTITY)
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn sort_by(mut self, key: impl Into<String>, ascending: bool) -> Self {
        self.sort.push(SortDescriptor {
            key: key.into(),
            ascending,
        });
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluate against candidate records. Records of other entities are dropped.
    pub fn apply(&self, records: impl IntoIterator<Item = Record>) -> Vec<Record> {
        let mut matched: Vec<Record> = records
            .into_iter()
            .filter(|r| r.entity() == self.entity)
            .filter(|r| self.predicate.as_ref().is_none_or(|p| p.matches(r)))
            .collect();

        if !self.sort.is_empty() {
            matched.sort_by(|a, b| {
                for descriptor in &self.sort {
                    let left = a.get(&descriptor.key).unwrap_or(&NULL);
                    let right = b.get(&descriptor.key).unwrap_or(&NULL);
                    let ord = compare(left, right).unwrap_or(Ordering::Equal);
                    let ord = if descriptor.ascending { ord } else { ord.reverse() };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let taken = matched.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => taken.take(limit).collect(),
            None => taken.collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, age: i64) -> Record {
        let mut record = Record::new("User");
        record.set("name", name);
        record.set("age", age);
        record
    }

    fn names(records: &[Record]) -> Vec<&str> {
        records.iter().filter_map(|r| r.get_text("name")).collect()
    }

    #[test]
    fn filters_sorts_and_limits() {
        let records = vec![user("carla", 41), user("ana", 29), user("bo", 35), user("dee", 18)];

        let query = Query::new("User")
            .filter(Predicate::gt("age", 20i64))
            .sort_by("name", true)
            .limit(2);
        assert_eq!(names(&query.apply(records.clone())), vec!["ana", "bo"]);

        let query = Query::new("User").sort_by("age", false).offset(1);
        assert_eq!(names(&query.apply(records)), vec!["bo", "ana", "dee"]);
    }

    #[test]
    fn missing_fields_compare_as_null() {
        let mut anonymous = Record::new("User");
        anonymous.set("age", 50i64);
        let records = vec![anonymous, user("ana", 29)];

        let query = Query::new("User").filter(Predicate::IsNull("name".into()));
        assert_eq!(query.apply(records.clone()).len(), 1);

        let query = Query::new("User").sort_by("name", true);
        let sorted = query.apply(records);
        assert_eq!(sorted[0].get_text("name"), None);
    }

    #[test]
    fn combinators() {
        let records = vec![user("ana", 29), user("bo", 35), user("carla", 41)];

        let either = Predicate::eq("name", "ana").or(Predicate::contains("name", "arl"));
        assert_eq!(names(&Query::new("User").filter(either).apply(records.clone())), vec!["ana", "carla"]);

        let neither = Predicate::eq("name", "ana").negate().and(Predicate::lt("age", 40i64));
        assert_eq!(names(&Query::new("User").filter(neither).apply(records.clone())), vec!["bo"]);

        assert!(Query::new("Post").apply(records).is_empty());
    }

    #[test]
    fn equality_agrees_with_ordering_across_numeric_kinds() {
        let records = vec![user("ana", 1), user("bo", 2)];

        let eq = Query::new("User").filter(Predicate::eq("age", 1.0));
        assert_eq!(names(&eq.apply(records.clone())), vec!["ana"]);

        let ne = Query::new("User").filter(Predicate::ne("age", 1.0));
        assert_eq!(names(&ne.apply(records.clone())), vec!["bo"]);

        let le = Query::new("User").filter(Predicate::Le("age".into(), FieldValue::Float(1.0)));
        assert_eq!(names(&le.apply(records.clone())), vec!["ana"]);

        let mismatched = Query::new("User").filter(Predicate::eq("age", "1"));
        assert!(mismatched.apply(records).is_empty());
    }
}
