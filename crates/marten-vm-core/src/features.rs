//! Feature flags
//!
//! Each flag is a boolean query on the context. Defaults depend on the
//! active language version; hosts override per-context.

use marten_vm_compiler::LanguageVersion;

/// Togglable engine features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Non-ECMA `getYear` semantics for old versions
    NonEcmaGetYear,
    /// Accept `function a.b.c() {}` definitions
    MemberExprAsFunctionName,
    /// Allow reserved keywords as identifiers
    ReservedKeywordAsIdentifier,
    /// `toString` doubles as `toSource`
    ToStringAsSource,
    /// Expose `__proto__` and `__parent__` properties
    ParentProtoProperties,
    /// E4X XML syntax support
    E4x,
    /// Dynamic scope lookup for shared scopes
    DynamicScope,
    /// Strict variable handling
    StrictVars,
    /// Strict `eval` handling
    StrictEval,
    /// Attach location information to error objects
    LocationInformationInError,
    /// Full strict mode (implies StrictVars and StrictEval)
    StrictMode,
    /// Upgrade warnings to errors
    WarningAsError,
    /// Expose wrapped host error internals to scripts
    EnhancedJavaAccess,
    /// V8 compatibility extensions
    V8Extensions,
    /// Old `undefined`/`null` receiver coercion
    OldUndefNullThis,
    /// ES6 enumeration order (integer ids first)
    EnumerateIdsFirst,
    /// Guard object property maps against data races
    ThreadSafeObjects,
    /// Print whole numbers without a decimal place
    IntegerWithoutDecimalPlace,
    /// Little-endian typed array views
    LittleEndian,
    /// Secure XML parsing
    EnableXmlSecureParsing,
    /// Map-like access on host maps
    EnableJavaMapAccess,
    /// ECMA-402 internationalization
    Intl402,
}

/// All features, for enumeration by hosts
pub const ALL_FEATURES: [Feature; 22] = [
    Feature::NonEcmaGetYear,
    Feature::MemberExprAsFunctionName,
    Feature::ReservedKeywordAsIdentifier,
    Feature::ToStringAsSource,
    Feature::ParentProtoProperties,
    Feature::E4x,
    Feature::DynamicScope,
    Feature::StrictVars,
    Feature::StrictEval,
    Feature::LocationInformationInError,
    Feature::StrictMode,
    Feature::WarningAsError,
    Feature::EnhancedJavaAccess,
    Feature::V8Extensions,
    Feature::OldUndefNullThis,
    Feature::EnumerateIdsFirst,
    Feature::ThreadSafeObjects,
    Feature::IntegerWithoutDecimalPlace,
    Feature::LittleEndian,
    Feature::EnableXmlSecureParsing,
    Feature::EnableJavaMapAccess,
    Feature::Intl402,
];

/// Version-dependent default for a feature.
pub fn default_for(feature: Feature, version: LanguageVersion) -> bool {
    use Feature::*;
    match feature {
        NonEcmaGetYear => {
            matches!(
                version,
                LanguageVersion::V1_0 | LanguageVersion::V1_1 | LanguageVersion::V1_2
            )
        }
        MemberExprAsFunctionName => false,
        ReservedKeywordAsIdentifier => true,
        ToStringAsSource => version == LanguageVersion::V1_2,
        ParentProtoProperties => true,
        E4x => version == LanguageVersion::DEFAULT || version >= LanguageVersion::V1_6,
        DynamicScope => false,
        StrictVars => false,
        StrictEval => false,
        LocationInformationInError => false,
        StrictMode => false,
        WarningAsError => false,
        EnhancedJavaAccess => false,
        V8Extensions => true,
        OldUndefNullThis => version <= LanguageVersion::V1_7,
        EnumerateIdsFirst => version.is_es6(),
        ThreadSafeObjects => false,
        IntegerWithoutDecimalPlace => false,
        LittleEndian => false,
        EnableXmlSecureParsing => true,
        EnableJavaMapAccess => false,
        Intl402 => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_dependent_defaults() {
        assert!(default_for(Feature::NonEcmaGetYear, LanguageVersion::V1_0));
        assert!(!default_for(Feature::NonEcmaGetYear, LanguageVersion::Es6));
        assert!(default_for(Feature::EnumerateIdsFirst, LanguageVersion::Es6));
        assert!(!default_for(
            Feature::EnumerateIdsFirst,
            LanguageVersion::V1_5
        ));
        assert!(default_for(Feature::ToStringAsSource, LanguageVersion::V1_2));
    }

    #[test]
    fn test_all_features_enumerated() {
        assert_eq!(ALL_FEATURES.len(), 22);
    }
}
