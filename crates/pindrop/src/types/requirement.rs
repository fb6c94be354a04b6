use super::specifier::CompareOp;
use crate::types::extra::Extra;
use crate::types::package_name::PackageName;
use crate::types::specifier::Specifiers;
use miette::{IntoDiagnostic, WrapErr};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::borrow::Borrow;
use std::fmt::Display;
use std::ops::Deref;
use std::str::FromStr;

/// Environment marker expressions: the boolean sub-language that gates a requirement on
/// properties of the installation target (`; python_version < "3.9"` and friends).
pub mod marker {
    use super::*;
    use pep440::Version;
    use std::collections::HashMap;
    use std::{borrow::Borrow, hash::Hash};

    /// One side of a marker comparison: either an environment variable or a quoted string.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    #[allow(missing_docs)]
    pub enum Value {
        Variable(String),
        Literal(String),
    }

    /// The operator of a marker comparison.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    #[allow(missing_docs)]
    pub enum Op {
        Compare(CompareOp),
        In,
        NotIn,
    }

    /// A parsed marker expression, evaluated by structural recursion.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    #[allow(missing_docs)]
    pub enum EnvMarkerExpr {
        And(Box<EnvMarkerExpr>, Box<EnvMarkerExpr>),
        Or(Box<EnvMarkerExpr>, Box<EnvMarkerExpr>),
        Operator { op: Op, lhs: Value, rhs: Value },
    }

    /// Provides the values of marker variables for some target environment.
    pub trait Env {
        /// Returns the value of the marker variable `var`, or `None` if it is unknown.
        fn get_marker_var(&self, var: &str) -> Option<&str>;
    }

    impl<T: Borrow<str> + Eq + Hash> Env for HashMap<T, T> {
        fn get_marker_var(&self, var: &str) -> Option<&str> {
            self.get(var).map(|s| s.borrow())
        }
    }

    impl Value {
        /// Resolves this value against the environment. Fails on unknown variables.
        pub fn eval<'a>(&'a self, env: &'a dyn Env) -> miette::Result<&'a str> {
            match self {
                Value::Variable(varname) => env.get_marker_var(varname).ok_or_else(|| {
                    miette::miette!("no environment marker variable named '{}'", varname)
                }),
                Value::Literal(s) => Ok(s),
            }
        }

        /// Returns true if this is the magic `extra` variable.
        pub fn is_extra(&self) -> bool {
            match self {
                Value::Variable(varname) => varname == "extra",
                Value::Literal(_) => false,
            }
        }
    }

    impl Display for Value {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Value::Variable(var) => write!(f, "{}", var),
                Value::Literal(literal) => {
                    if literal.contains('"') {
                        write!(f, "'{}'", literal)
                    } else {
                        write!(f, "\"{}\"", literal)
                    }
                }
            }
        }
    }

    /// Resolves one side of a comparison that involves the `extra` variable. Both sides
    /// get extra-normalized (PEP 685) so `extra == 'Brotli_Support'` matches `brotli-support`.
    fn extra_side_value(
        value: &Value,
        env: &dyn Env,
        active: &Extra,
    ) -> miette::Result<String> {
        Ok(match value {
            Value::Variable(var) if var == "extra" => active.as_str().to_owned(),
            Value::Variable(var) => env
                .get_marker_var(var)
                .ok_or_else(|| {
                    miette::miette!("no environment marker variable named '{}'", var)
                })?
                .to_owned(),
            Value::Literal(s) => match Extra::from_str(s) {
                Ok(normalized) => normalized.as_str().to_owned(),
                Err(never) => match never {},
            },
        })
    }

    fn string_compare(op: &Op, lhs: &str, rhs: &str) -> miette::Result<bool> {
        use CompareOp::*;
        Ok(match op {
            Op::In => rhs.contains(lhs),
            Op::NotIn => !rhs.contains(lhs),
            Op::Compare(op) => match op {
                LessThanEqual => lhs <= rhs,
                StrictlyLessThan => lhs < rhs,
                NotEqual => lhs != rhs,
                Equal => lhs == rhs,
                ArbitraryEqual => lhs == rhs,
                GreaterThanEqual => lhs >= rhs,
                StrictlyGreaterThan => lhs > rhs,
                Compatible => {
                    miette::bail!("~= requires valid version strings")
                }
            },
        })
    }

    impl EnvMarkerExpr {
        /// Evaluates the expression against `env` with `extra` naming the extra currently
        /// being expanded. Comparisons that involve the `extra` variable are false when no
        /// extra is active.
        pub fn eval(&self, env: &dyn Env, extra: Option<&Extra>) -> miette::Result<bool> {
            Ok(match self {
                EnvMarkerExpr::And(lhs, rhs) => lhs.eval(env, extra)? && rhs.eval(env, extra)?,
                EnvMarkerExpr::Or(lhs, rhs) => lhs.eval(env, extra)? || rhs.eval(env, extra)?,
                EnvMarkerExpr::Operator { op, lhs, rhs } => {
                    if lhs.is_extra() || rhs.is_extra() {
                        let Some(active) = extra else {
                            return Ok(false);
                        };
                        let lhs_val = extra_side_value(lhs, env, active)?;
                        let rhs_val = extra_side_value(rhs, env, active)?;
                        return string_compare(op, &lhs_val, &rhs_val);
                    }

                    let lhs_val = lhs.eval(env)?;
                    let rhs_val = rhs.eval(env)?;
                    if let Op::Compare(compare_op) = op {
                        // If the left side parses as a version and the right side forms a
                        // valid version range (including wildcards), compare as versions;
                        // otherwise fall back to plain string comparison.
                        if let Some(lhs_ver) = Version::parse(lhs_val) {
                            if let Ok(rhs_ranges) = compare_op.ranges(rhs_val) {
                                return Ok(rhs_ranges
                                    .into_iter()
                                    .any(|r| r.contains(&lhs_ver)));
                            }
                        }
                    }
                    return string_compare(op, lhs_val, rhs_val);
                }
            })
        }
    }

    impl Display for EnvMarkerExpr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                EnvMarkerExpr::And(lhs, rhs) => write!(f, "({} and {})", lhs, rhs)?,
                EnvMarkerExpr::Or(lhs, rhs) => write!(f, "({} or {})", lhs, rhs)?,
                EnvMarkerExpr::Operator { op, lhs, rhs } => write!(
                    f,
                    "{} {} {}",
                    lhs,
                    match op {
                        Op::Compare(compare_op) => compare_op.to_string(),
                        Op::In => "in".to_string(),
                        Op::NotIn => "not in".to_string(),
                    },
                    rhs,
                )?,
            }
            Ok(())
        }
    }
}

/// Whether the magic `extra` marker variable is allowed while parsing. It only makes sense
/// inside metadata of a package that declares extras; user input referencing it is an error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ParseExtraInEnv {
    Allowed,
    NotAllowed,
}

/// A single parsed PEP 508 dependency specification: name, optional extras, a version
/// specifier set and an optional environment marker. Instances are immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Requirement {
    pub name: PackageName,
    pub extras: Vec<Extra>,
    pub specifiers: Specifiers,
    pub env_marker_expr: Option<marker::EnvMarkerExpr>,
}

impl Requirement {
    /// Parses a requirement string such as `flask[async] >=2, <3; python_version >= "3.8"`.
    pub fn parse(input: &str, parse_extra: ParseExtraInEnv) -> miette::Result<Requirement> {
        let req = super::reqparse::requirement(input, parse_extra)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed parsing requirement string {:?}", input))?;
        Ok(req)
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name.as_source_str())?;
        if !self.extras.is_empty() {
            write!(f, "[")?;
            let mut first = true;
            for extra in &self.extras {
                if !first {
                    write!(f, ",")?;
                }
                first = false;
                write!(f, "{}", extra.as_source_str())?;
            }
            write!(f, "]")?;
        }
        if !self.specifiers.0.is_empty() {
            write!(f, " {}", self.specifiers)?;
        }
        if let Some(env_marker) = &self.env_marker_expr {
            write!(f, "; {}", env_marker)?;
        }
        Ok(())
    }
}

/// A requirement as it appears in package metadata. The `extra` marker variable is allowed.
#[derive(Debug, Clone, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct PackageRequirement(Requirement);

impl PackageRequirement {
    /// Unwraps into the inner [`Requirement`].
    pub fn into_inner(self) -> Requirement {
        self.0
    }
}

impl Display for PackageRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PackageRequirement {
    type Err = miette::Report;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(PackageRequirement(Requirement::parse(
            value,
            ParseExtraInEnv::Allowed,
        )?))
    }
}

impl AsRef<Requirement> for PackageRequirement {
    fn as_ref(&self) -> &Requirement {
        &self.0
    }
}

impl Borrow<Requirement> for PackageRequirement {
    fn borrow(&self) -> &Requirement {
        &self.0
    }
}

impl Deref for PackageRequirement {
    type Target = Requirement;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A requirement supplied by the caller as a resolution root. Referencing the `extra`
/// marker variable here is rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct UserRequirement(Requirement);

impl UserRequirement {
    /// Unwraps into the inner [`Requirement`].
    pub fn into_inner(self) -> Requirement {
        self.0
    }

    /// Returns a reference to the inner [`Requirement`].
    pub fn as_inner(&self) -> &Requirement {
        &self.0
    }
}

impl Display for UserRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for UserRequirement {
    type Err = miette::Report;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(UserRequirement(Requirement::parse(
            value,
            ParseExtraInEnv::NotAllowed,
        )?))
    }
}

impl AsRef<Requirement> for UserRequirement {
    fn as_ref(&self) -> &Requirement {
        &self.0
    }
}

impl Deref for UserRequirement {
    type Target = Requirement;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_package_requirement_basics() {
        let r: PackageRequirement =
            "twisted[tls] >= 20, != 20.1.*; python_version >= '3' and extra == 'hi'"
                .parse()
                .unwrap();
        insta::assert_ron_snapshot!(
            r,
            @r###""twisted[tls] >= 20, != 20.1.*; (python_version >= \"3\" and extra == \"hi\")""###
        );
    }

    #[test]
    fn test_user_requirement_rejects_extra_marker() {
        assert!(UserRequirement::from_str("twisted; extra == 'hi'").is_err());
        let r: UserRequirement = "twisted[tls] >= 20, != 20.1.*; python_version >= '3'"
            .parse()
            .unwrap();
        insta::assert_ron_snapshot!(
            r,
            @r###""twisted[tls] >= 20, != 20.1.*; python_version >= \"3\"""###
        );
    }

    #[test]
    fn test_no_paren_chained_operators() {
        // The formal grammar in PEP 508 fails to parse expressions like:
        //   "_ and _ and _"
        //   "_ or _ or _"
        let r: PackageRequirement =
            "foo; os_name == 'a' and os_name == 'b' and os_name == 'c' or os_name == 'd' or os_name == 'e'"
                .parse()
                .unwrap();
        assert_eq!(
            r.to_string(),
            "foo; ((os_name == \"a\" and (os_name == \"b\" and os_name == \"c\")) or (os_name == \"d\" or os_name == \"e\"))"
        );
    }

    #[test]
    fn test_legacy_env_marker_vars() {
        // these parse and normalize to their PEP 508 equivalents
        let r: PackageRequirement = "foo; os.name == 'nt' and python_implementation == 'pypy'"
            .parse()
            .unwrap();
        assert_eq!(
            r.to_string(),
            "foo; (os_name == \"nt\" and platform_python_implementation == \"pypy\")"
        );
    }

    #[test]
    fn test_requirement_roundtrip() {
        let reqs = vec![
            "foo",
            "foo (>=2, <3)",
            "foo >=1,<2, ~=3.1, ==0.0.*, !=7, >10, <= 8",
            "foo === 1.0+local",
            "foo[bar,baz, quux]",
            "foo; python_version >= '3' and sys_platform == \"win32\" or sys_platform != \"linux\"",
            "foo.bar-baz (~=7); 'win' in sys_platform or 'linux' not in sys_platform",
        ];
        for req in reqs {
            let ur: PackageRequirement = req.parse().unwrap();
            assert_eq!(ur, ur.to_string().parse().unwrap());
        }
    }

    fn env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("python_version", "3.10"),
            ("python_full_version", "3.10.4"),
            ("os_name", "posix"),
            ("sys_platform", "linux"),
        ])
    }

    fn eval(marker: &str, extra: Option<&str>) -> bool {
        let r: PackageRequirement = format!("x; {marker}").parse().unwrap();
        let extra = extra.map(|e| e.parse::<Extra>().unwrap());
        r.env_marker_expr
            .as_ref()
            .unwrap()
            .eval(&env(), extra.as_ref())
            .unwrap()
    }

    #[test]
    fn test_marker_version_comparison() {
        assert!(eval("python_version < '3.11'", None));
        assert!(eval("python_version >= '3.10'", None));
        assert!(!eval("python_version < '3.9'", None));
        // version comparison, not string comparison: "3.10" < "3.9" lexically
        assert!(!eval("python_full_version < '3.9.0'", None));
        assert!(eval("python_version == '3.10.*'", None));
    }

    #[test]
    fn test_marker_string_comparison() {
        assert!(eval("os_name == 'posix'", None));
        assert!(eval("'linux' in sys_platform", None));
        assert!(eval("'win' not in sys_platform", None));
    }

    #[test]
    fn test_extra_comparisons_false_without_active_extra() {
        assert!(!eval("extra == 'feature'", None));
        // even negated comparisons are false outside an extra context
        assert!(!eval("extra != 'feature'", None));
        assert!(eval("extra == 'feature'", Some("feature")));
        assert!(!eval("extra == 'feature'", Some("other")));
        assert!(eval("extra != 'feature'", Some("other")));
    }

    #[test]
    fn test_extra_normalization_pep685() {
        assert!(eval("extra == 'Feature_One'", Some("feature-one")));
        assert!(eval("'feature-one' == extra", Some("Feature.One")));
    }

    #[test]
    fn test_extra_and_env_combined() {
        assert!(eval(
            "python_version >= '3.8' and extra == 'cli'",
            Some("cli")
        ));
        assert!(!eval("python_version >= '3.8' and extra == 'cli'", None));
        // or-branch keeps the expression alive without the extra
        assert!(eval("python_version >= '3.8' or extra == 'cli'", None));
    }
}
