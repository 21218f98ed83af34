//! Column type compatibility for linking fields.
//!
//! Declared types are free-form strings in the data model. They are parsed into
//! [`ColumnType`] here, at the boundary, so the compatibility table stays exhaustive.
//! Types grouped in the same class can be linked to each other:
//!
//! - integers: `smallint`, `int`, `bigint`
//! - numerics: `decimal`, `numeric`, `real`, `double precision`
//! - text: `text`, `varchar`, `char`
//! - timestamps: `timestamp`, `timestamptz`
//! - times: `time`, `timetz`
//! - singletons: `uuid`, `date`, `interval`, `boolean`, json family, arrays

const INTEGERS: &[ColumnType] = &[ColumnType::BigInt, ColumnType::Int, ColumnType::SmallInt];
const NUMERICS: &[ColumnType] = &[
    ColumnType::Decimal,
    ColumnType::Numeric,
    ColumnType::Real,
    ColumnType::DoublePrecision,
];
const TEXTS: &[ColumnType] = &[ColumnType::Text, ColumnType::Varchar, ColumnType::Char];
const TIMESTAMPS: &[ColumnType] = &[ColumnType::Timestamp, ColumnType::Timestamptz];
const TIMES: &[ColumnType] = &[ColumnType::Time, ColumnType::Timetz];
const UUIDS: &[ColumnType] = &[ColumnType::Uuid];
const DATES: &[ColumnType] = &[ColumnType::Date];
const INTERVALS: &[ColumnType] = &[ColumnType::Interval];
const BOOLEANS: &[ColumnType] = &[ColumnType::Boolean];
const JSONS: &[ColumnType] = &[ColumnType::Json, ColumnType::Jsonb];
const ARRAYS: &[ColumnType] = &[ColumnType::Array];

/// A declared column type, normalised
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    SmallInt,
    Int,
    BigInt,
    Decimal,
    Numeric,
    Real,
    DoublePrecision,
    Text,
    Varchar,
    Char,
    Timestamp,
    Timestamptz,
    Time,
    Timetz,
    Uuid,
    Date,
    Interval,
    Boolean,
    Json,
    Jsonb,
    Array,
    /// Anything not modelled above, kept verbatim (lowercased)
    Unknown(String),
}

impl ColumnType {
    /// Parses a declared type. Never fails; unrecognised input becomes `Unknown`.
    pub fn parse(declared: &str) -> Self {
        let lowered = declared.trim().to_lowercase();
        if lowered.ends_with("[]") || lowered.starts_with("array") {
            return ColumnType::Array;
        }
        // Drop length/precision modifiers: varchar(255), numeric(10,2), timestamp(3)
        let base = match lowered.find('(') {
            Some(idx) => {
                let after = lowered[idx..]
                    .find(')')
                    .map(|end| lowered[idx + end + 1..].trim().to_string())
                    .unwrap_or_default();
                let head = lowered[..idx].trim();
                if after.is_empty() {
                    head.to_string()
                } else {
                    format!("{} {}", head, after)
                }
            }
            None => lowered.clone(),
        };
        let base = base.split_whitespace().collect::<Vec<_>>().join(" ");

        match base.as_str() {
            "smallint" | "int2" | "smallserial" | "serial2" => ColumnType::SmallInt,
            "int" | "integer" | "int4" | "serial" | "serial4" => ColumnType::Int,
            "bigint" | "int8" | "bigserial" | "serial8" => ColumnType::BigInt,
            "decimal" => ColumnType::Decimal,
            "numeric" => ColumnType::Numeric,
            "real" | "float4" => ColumnType::Real,
            "double precision" | "float8" | "float" | "double" => ColumnType::DoublePrecision,
            "text" => ColumnType::Text,
            "varchar" | "character varying" => ColumnType::Varchar,
            "char" | "character" | "bpchar" => ColumnType::Char,
            "timestamp" | "timestamp without time zone" => ColumnType::Timestamp,
            "timestamptz" | "timestamp with time zone" => ColumnType::Timestamptz,
            "time" | "time without time zone" => ColumnType::Time,
            "timetz" | "time with time zone" => ColumnType::Timetz,
            "uuid" => ColumnType::Uuid,
            "date" => ColumnType::Date,
            "interval" => ColumnType::Interval,
            "boolean" | "bool" => ColumnType::Boolean,
            "json" => ColumnType::Json,
            "jsonb" => ColumnType::Jsonb,
            _ => ColumnType::Unknown(lowered),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ColumnType::Unknown(_))
    }

    /// Canonical spelling used in messages
    pub fn canonical_name(&self) -> &str {
        match self {
            ColumnType::SmallInt => "smallint",
            ColumnType::Int => "int",
            ColumnType::BigInt => "bigint",
            ColumnType::Decimal => "decimal",
            ColumnType::Numeric => "numeric",
            ColumnType::Real => "real",
            ColumnType::DoublePrecision => "double precision",
            ColumnType::Text => "text",
            ColumnType::Varchar => "varchar",
            ColumnType::Char => "char",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Timestamptz => "timestamptz",
            ColumnType::Time => "time",
            ColumnType::Timetz => "timetz",
            ColumnType::Uuid => "uuid",
            ColumnType::Date => "date",
            ColumnType::Interval => "interval",
            ColumnType::Boolean => "boolean",
            ColumnType::Json => "json",
            ColumnType::Jsonb => "jsonb",
            ColumnType::Array => "array",
            ColumnType::Unknown(raw) => raw,
        }
    }

    /// Types a field of this type may be linked to, itself included
    pub fn allowed_targets(&self) -> &'static [ColumnType] {
        use ColumnType::*;
        match self {
            SmallInt | Int | BigInt => INTEGERS,
            Decimal | Numeric | Real | DoublePrecision => NUMERICS,
            Text | Varchar | Char => TEXTS,
            Timestamp | Timestamptz => TIMESTAMPS,
            Time | Timetz => TIMES,
            Uuid => UUIDS,
            Date => DATES,
            Interval => INTERVALS,
            Boolean => BOOLEANS,
            Json | Jsonb => JSONS,
            Array => ARRAYS,
            Unknown(_) => &[],
        }
    }

    /// True if this type's class lists `other`
    fn lists(&self, other: &ColumnType) -> bool {
        self.allowed_targets().contains(other)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

/// Whether a field declared as `a` may be linked to one declared as `b`.
///
/// Symmetric: the class table is consulted from both sides. Unknown types are
/// never compatible, not even with themselves.
pub fn compatible(a: &str, b: &str) -> bool {
    compatible_types(&ColumnType::parse(a), &ColumnType::parse(b))
}

pub fn compatible_types(a: &ColumnType, b: &ColumnType) -> bool {
    if !a.is_known() || !b.is_known() {
        return false;
    }
    a == b || a.lists(b) || b.lists(a)
}

/// Rejection message naming the types `a` may link to
pub fn explain(a: &str, b: &str) -> String {
    let source = ColumnType::parse(a);
    let target = ColumnType::parse(b);
    if !source.is_known() {
        return format!(
            "Cannot link '{}' to '{}': '{}' is not a recognised column type",
            a.trim(),
            b.trim(),
            a.trim()
        );
    }
    let allowed = source
        .allowed_targets()
        .iter()
        .map(|t| t.canonical_name())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Cannot link '{}' to '{}': a {} field can only reference fields of type {}",
        a.trim(),
        b.trim(),
        source,
        if target.is_known() {
            allowed
        } else {
            format!("{} (got unrecognised type '{}')", allowed, b.trim())
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN: &[&str] = &[
        "smallint",
        "int",
        "integer",
        "bigint",
        "decimal",
        "numeric(10,2)",
        "real",
        "double precision",
        "text",
        "varchar(255)",
        "char(2)",
        "timestamp",
        "timestamptz",
        "timestamp with time zone",
        "time",
        "timetz",
        "uuid",
        "date",
        "interval",
        "boolean",
        "json",
        "jsonb",
        "text[]",
    ];

    #[test]
    fn test_parse_aliases_and_modifiers() {
        assert_eq!(ColumnType::parse("VARCHAR(255)"), ColumnType::Varchar);
        assert_eq!(ColumnType::parse("character varying(40)"), ColumnType::Varchar);
        assert_eq!(ColumnType::parse("int4"), ColumnType::Int);
        assert_eq!(ColumnType::parse("  BIGINT "), ColumnType::BigInt);
        assert_eq!(ColumnType::parse("timestamp(3) with time zone"), ColumnType::Timestamptz);
        assert_eq!(ColumnType::parse("bool"), ColumnType::Boolean);
        assert_eq!(ColumnType::parse("uuid[]"), ColumnType::Array);
        assert_eq!(
            ColumnType::parse("geometry"),
            ColumnType::Unknown("geometry".to_string())
        );
    }

    #[test]
    fn test_reflexive_for_known_types() {
        for t in KNOWN {
            assert!(compatible(t, t), "{} should be compatible with itself", t);
        }
    }

    #[test]
    fn test_symmetric_for_all_pairs() {
        let mut all: Vec<&str> = KNOWN.to_vec();
        all.extend(["geometry", "", "tsvector", "money"]);
        for a in &all {
            for b in &all {
                assert_eq!(compatible(a, b), compatible(b, a), "asymmetry for {} / {}", a, b);
            }
        }
    }

    #[test]
    fn test_classes() {
        assert!(compatible("int", "bigint"));
        assert!(compatible("smallint", "integer"));
        assert!(compatible("numeric", "double precision"));
        assert!(compatible("varchar(50)", "text"));
        assert!(compatible("timestamp", "timestamptz"));
        assert!(compatible("json", "jsonb"));
        assert!(!compatible("uuid", "text"));
        assert!(!compatible("int", "numeric"));
        assert!(!compatible("date", "timestamp"));
        assert!(!compatible("boolean", "int"));
    }

    #[test]
    fn test_unknown_types_are_never_compatible() {
        assert!(!compatible("geometry", "geometry"));
        assert!(!compatible("geometry", "uuid"));
        assert!(!compatible("", ""));
    }

    #[test]
    fn test_explain_names_allowed_targets() {
        let message = explain("uuid", "text");
        assert!(message.contains("uuid"));
        assert!(message.contains("can only reference fields of type uuid"));

        let message = explain("int", "uuid");
        assert!(message.contains("bigint, int, smallint"));

        let message = explain("geometry", "uuid");
        assert!(message.contains("not a recognised column type"));
    }
}
