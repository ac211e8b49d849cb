//! Declarative registry of report fields that can become metric labels.
//!
//! A [`LabelSchema`] maps each field name to a typed accessor for exactly one
//! scope: the report as a whole, one section of it, or one leaf result.
//! Label vectors are always built by declared scope, so a report-level field
//! is never read from a result object and the reverse.
//!
//! Operators choose labels by name or by group. The pseudo-group
//! [`ALL_GROUP`] selects every field.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use tally_types::ObjectMeta;
use tracing::warn;

use crate::error::{MetricsError, MetricsResult};
use crate::registry::LabelValues;

/// Pseudo-group containing every declared field.
pub const ALL_GROUP: &str = "all";

/// The object a field is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldScope {
    Report,
    Section,
    Result,
}

impl FieldScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Section => "section",
            Self::Result => "result",
        }
    }
}

impl fmt::Display for FieldScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name, scope, and group memberships of one exposable field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelDescriptor {
    pub name: String,
    pub scope: FieldScope,
    pub groups: Vec<String>,
}

impl LabelDescriptor {
    pub fn in_group(&self, group: &str) -> bool {
        group == ALL_GROUP || self.groups.iter().any(|g| g == group)
    }
}

/// One object handed to [`LabelSchema::field_value`].
pub enum ScopeObject<'a, R, S, T> {
    Report(&'a ObjectMeta, &'a R),
    Section(&'a S),
    Result(&'a T),
}

enum Accessor<R, S, T> {
    Report(fn(&ObjectMeta, &R) -> String),
    Section(fn(&S) -> String),
    Result(fn(&T) -> String),
}

struct Field<R, S, T> {
    descriptor: LabelDescriptor,
    accessor: Accessor<R, S, T>,
}

/// Field registry for one report type.
///
/// `R` is the report body, `S` a section, and `T` a leaf result. Kinds
/// without sections use `()` for `S`.
pub struct LabelSchema<R, S, T> {
    subject: String,
    identity: Vec<String>,
    fields: Vec<Field<R, S, T>>,
    warned: Mutex<HashSet<String>>,
}

impl<R, S, T> LabelSchema<R, S, T> {
    /// Start a schema. `identity` names the report-scoped labels that
    /// identify one report in every family.
    pub fn new(subject: impl Into<String>, identity: &[&str]) -> Self {
        Self {
            subject: subject.into(),
            identity: identity.iter().map(|s| s.to_string()).collect(),
            fields: Vec::new(),
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn report(self, name: &str, groups: &[&str], f: fn(&ObjectMeta, &R) -> String) -> Self {
        self.with_field(name, FieldScope::Report, groups, Accessor::Report(f))
    }

    pub fn section(self, name: &str, groups: &[&str], f: fn(&S) -> String) -> Self {
        self.with_field(name, FieldScope::Section, groups, Accessor::Section(f))
    }

    pub fn result(self, name: &str, groups: &[&str], f: fn(&T) -> String) -> Self {
        self.with_field(name, FieldScope::Result, groups, Accessor::Result(f))
    }

    fn with_field(
        mut self,
        name: &str,
        scope: FieldScope,
        groups: &[&str],
        accessor: Accessor<R, S, T>,
    ) -> Self {
        self.fields.retain(|f| f.descriptor.name != name);
        self.fields.push(Field {
            descriptor: LabelDescriptor {
                name: name.to_string(),
                scope,
                groups: groups.iter().map(|g| g.to_string()).collect(),
            },
            accessor,
        });
        self
    }

    /// What this schema describes, e.g. a kind name. Used in errors.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn identity_labels(&self) -> &[String] {
        &self.identity
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &LabelDescriptor> {
        self.fields.iter().map(|f| &f.descriptor)
    }

    pub fn descriptor(&self, name: &str) -> Option<&LabelDescriptor> {
        self.descriptors().find(|d| d.name == name)
    }

    /// Group names in first-declared order, starting with [`ALL_GROUP`].
    pub fn groups(&self) -> Vec<String> {
        let mut groups = vec![ALL_GROUP.to_string()];
        for g in self.descriptors().flat_map(|d| d.groups.iter()) {
            if !groups.contains(g) {
                groups.push(g.clone());
            }
        }
        groups
    }

    /// Fields belonging to `group`, in declaration order.
    pub fn fields_in_group(&self, group: &str) -> MetricsResult<Vec<&LabelDescriptor>> {
        if !self.groups().iter().any(|g| g == group) {
            return Err(MetricsError::UnknownGroup(group.to_string()));
        }
        Ok(self.descriptors().filter(|d| d.in_group(group)).collect())
    }

    /// Resolve an operator's label selection into label names.
    ///
    /// Accepts `all` or a comma-separated list of field and group names.
    /// Duplicates are dropped keeping first position, and the identity
    /// labels are appended so every series can be retracted by identity.
    /// An empty selection stays empty. Unknown names are an error.
    pub fn select(&self, selection: &str) -> MetricsResult<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        };

        let mut any = false;
        for term in selection.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            any = true;
            if let Some(d) = self.descriptor(term) {
                push(&d.name);
                continue;
            }
            match self.fields_in_group(term) {
                Ok(fields) => fields.iter().for_each(|d| push(&d.name)),
                Err(_) => {
                    return Err(MetricsError::UnknownLabel {
                        label: term.to_string(),
                        context: format!("{} label schema", self.subject),
                    })
                }
            }
        }
        if any {
            for id in &self.identity {
                push(id);
            }
        }
        Ok(names)
    }

    /// Value of one field read from `object`.
    ///
    /// Unknown fields, and fields whose scope differs from the object's,
    /// yield the empty string. Unknown fields are warned about once.
    pub fn field_value(&self, name: &str, object: ScopeObject<'_, R, S, T>) -> String {
        let Some(field) = self.fields.iter().find(|f| f.descriptor.name == name) else {
            self.warn_unknown(name);
            return String::new();
        };
        match (&field.accessor, object) {
            (Accessor::Report(f), ScopeObject::Report(meta, report)) => f(meta, report),
            (Accessor::Section(f), ScopeObject::Section(section)) => f(section),
            (Accessor::Result(f), ScopeObject::Result(result)) => f(result),
            _ => String::new(),
        }
    }

    /// Build a label vector for `labels`, reading each field from the object
    /// of its own scope. Fields whose scope object is absent are empty.
    pub fn vector(
        &self,
        labels: &[String],
        meta: &ObjectMeta,
        report: &R,
        section: Option<&S>,
        result: Option<&T>,
    ) -> LabelValues {
        labels
            .iter()
            .map(|name| {
                let object = match self.descriptor(name).map(|d| d.scope) {
                    Some(FieldScope::Section) => section.map(ScopeObject::Section),
                    Some(FieldScope::Result) => result.map(ScopeObject::Result),
                    // Report scope, or unknown: field_value handles the latter.
                    _ => Some(ScopeObject::Report(meta, report)),
                };
                let value = object
                    .map(|o| self.field_value(name, o))
                    .unwrap_or_default();
                (name.clone(), value)
            })
            .collect()
    }

    /// Identity labels of one report.
    pub fn identity(&self, meta: &ObjectMeta, report: &R) -> LabelValues {
        self.vector(&self.identity, meta, report, None, None)
    }

    fn warn_unknown(&self, name: &str) {
        let first = self
            .warned
            .lock()
            .expect("warned fields lock poisoned")
            .insert(name.to_string());
        if first {
            warn!(schema = %self.subject, field = name, "unknown label field, using empty value");
        }
    }
}

impl<R, S, T> fmt::Debug for LabelSchema<R, S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelSchema")
            .field("subject", &self.subject)
            .field("identity", &self.identity)
            .field(
                "fields",
                &self.descriptors().map(|d| &d.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_types::ObjectKey;

    struct Report {
        passed: u32,
    }
    struct Section {
        title: String,
    }
    struct Check {
        id: String,
    }

    fn schema() -> LabelSchema<Report, Section, Check> {
        LabelSchema::<Report, Section, Check>::new("toy", &["name"])
            .report("name", &["summary"], |meta, _| meta.name.clone())
            .report("passed", &["summary"], |_, r| r.passed.to_string())
            .section("title", &["section"], |s| s.title.clone())
            .result("id", &["detail"], |c| c.id.clone())
    }

    fn meta() -> ObjectMeta {
        ObjectMeta::new(&ObjectKey::cluster("node-1"))
    }

    #[test]
    fn groups_include_all() {
        let s = schema();
        assert_eq!(s.groups(), vec!["all", "summary", "section", "detail"]);
        let summary: Vec<_> = s
            .fields_in_group("summary")
            .unwrap()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(summary, vec!["name", "passed"]);
        assert_eq!(s.fields_in_group(ALL_GROUP).unwrap().len(), 4);
        assert!(matches!(
            s.fields_in_group("nope"),
            Err(MetricsError::UnknownGroup(_))
        ));
    }

    #[test]
    fn select_dedups_and_appends_identity() {
        let s = schema();
        assert_eq!(s.select("id, title, id").unwrap(), vec!["id", "title", "name"]);
        assert_eq!(
            s.select("all").unwrap(),
            vec!["name", "passed", "title", "id"]
        );
        assert_eq!(s.select("detail").unwrap(), vec!["id", "name"]);
        assert!(s.select("").unwrap().is_empty());
    }

    #[test]
    fn select_rejects_unknown_names() {
        let err = schema().select("id,bogus").unwrap_err();
        assert!(matches!(err, MetricsError::UnknownLabel { label, .. } if label == "bogus"));
    }

    #[test]
    fn field_value_binds_by_scope() {
        let s = schema();
        let m = meta();
        let r = Report { passed: 7 };
        let c = Check { id: "1.1.1".into() };

        assert_eq!(s.field_value("passed", ScopeObject::Report(&m, &r)), "7");
        assert_eq!(s.field_value("id", ScopeObject::Result(&c)), "1.1.1");
        // A result field asked of the report is empty, not a panic.
        assert_eq!(s.field_value("id", ScopeObject::Report(&m, &r)), "");
        assert_eq!(s.field_value("unknown", ScopeObject::Result(&c)), "");
    }

    #[test]
    fn vector_reads_each_field_from_its_scope() {
        let s = schema();
        let m = meta();
        let r = Report { passed: 2 };
        let sec = Section {
            title: "Control Plane".into(),
        };
        let c = Check { id: "1.2.3".into() };
        let labels = s.select("all").unwrap();

        let v = s.vector(&labels, &m, &r, Some(&sec), Some(&c));
        assert_eq!(v["name"], "node-1");
        assert_eq!(v["passed"], "2");
        assert_eq!(v["title"], "Control Plane");
        assert_eq!(v["id"], "1.2.3");

        let without_section = s.vector(&labels, &m, &r, None, Some(&c));
        assert_eq!(without_section["title"], "");
    }

    #[test]
    fn identity_is_report_scoped() {
        let s = schema();
        let v = s.identity(&meta(), &Report { passed: 0 });
        assert_eq!(v.len(), 1);
        assert_eq!(v["name"], "node-1");
    }
}
