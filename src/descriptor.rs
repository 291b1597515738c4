//! Descriptor resolution: mapping a (family, model) pair or an advertised
//! BLE name to a supported-device descriptor.
//!
//! Advertised names are often abbreviated or ambiguous, so name resolution
//! runs a curated, order-sensitive rule table first and only then falls
//! back to the catalog's own filter predicates, which are looser and can
//! produce wrong matches for overlapping vendor naming schemes.

use tracing::{debug, warn};

use crate::error::{DcError, DcResult};
use crate::models::{Family, RuleMatch, Transport, TransportSet};

/// Name-filter predicate carried by a descriptor. Mirrors the catalog's
/// own matching logic: given a transport and a raw advertised name, decide
/// whether the descriptor could be that device.
pub type NameFilter = fn(Transport, &str) -> bool;

/// One supported vendor+model combination from the engine's catalog.
#[derive(Clone, Debug)]
pub struct Descriptor {
    pub vendor: &'static str,
    pub product: &'static str,
    pub family: Family,
    pub model: u32,
    pub transports: TransportSet,
    pub filter: Option<NameFilter>,
}

impl Descriptor {
    /// Human-readable "Vendor Product" string.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.vendor, self.product)
    }

    /// Apply the descriptor's name filter. A descriptor without a filter
    /// accepts every name, matching the catalog's behavior.
    pub fn accepts(&self, transport: Transport, name: &str) -> bool {
        match self.filter {
            Some(filter) => filter(transport, name),
            None => true,
        }
    }
}

/// Iterable source of descriptors. Iterator creation is fallible because
/// the catalog lives in the engine.
pub trait DescriptorCatalog {
    fn descriptors(&self) -> DcResult<Box<dyn Iterator<Item = Descriptor> + '_>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchKind {
    /// Full string match. Evaluated as a substring search, identical to
    /// `Contains`; the distinction is kept for table readability only.
    Exact,
    /// Literal prefix match.
    Prefix,
    /// Substring match.
    Contains,
}

/// One entry of the advertised-name rule table.
#[derive(Clone, Copy, Debug)]
pub struct NamingRule {
    pub pattern: &'static str,
    pub vendor: &'static str,
    pub product: &'static str,
    pub kind: MatchKind,
}

impl NamingRule {
    pub fn matches(&self, name: &str) -> bool {
        match self.kind {
            MatchKind::Exact | MatchKind::Contains => name.contains(self.pattern),
            MatchKind::Prefix => name.starts_with(self.pattern),
        }
    }
}

const fn rule(
    pattern: &'static str,
    vendor: &'static str,
    product: &'static str,
    kind: MatchKind,
) -> NamingRule {
    NamingRule {
        pattern,
        vendor,
        product,
        kind,
    }
}

/// Known advertised-name rules. Order matters: more specific patterns come
/// first, so "Petrel 3" wins over "Petrel" and "NERD 2" over "NERD".
pub static NAME_RULES: &[NamingRule] = &[
    // Shearwater
    rule("Predator", "Shearwater", "Predator", MatchKind::Exact),
    rule("Perdix 2", "Shearwater", "Perdix 2", MatchKind::Exact),
    rule("Petrel 3", "Shearwater", "Petrel 3", MatchKind::Exact),
    // Both Petrel and Petrel 2 advertise as "Petrel".
    rule("Petrel", "Shearwater", "Petrel 2", MatchKind::Exact),
    rule("Perdix", "Shearwater", "Perdix", MatchKind::Exact),
    rule("Teric", "Shearwater", "Teric", MatchKind::Exact),
    rule("Peregrine", "Shearwater", "Peregrine", MatchKind::Exact),
    rule("NERD 2", "Shearwater", "NERD 2", MatchKind::Exact),
    rule("NERD", "Shearwater", "NERD", MatchKind::Exact),
    rule("Tern", "Shearwater", "Tern", MatchKind::Exact),
    // Suunto
    rule("EON Steel", "Suunto", "EON Steel", MatchKind::Exact),
    rule("Suunto D5", "Suunto", "D5", MatchKind::Exact),
    rule("EON Core", "Suunto", "EON Core", MatchKind::Exact),
    // Scubapro
    rule("G2", "Scubapro", "G2", MatchKind::Exact),
    rule("HUD", "Scubapro", "G2 HUD", MatchKind::Exact),
    rule("G3", "Scubapro", "G3", MatchKind::Exact),
    rule("Aladin", "Scubapro", "Aladin Sport Matrix", MatchKind::Exact),
    rule("A1", "Scubapro", "Aladin A1", MatchKind::Exact),
    rule("A2", "Scubapro", "Aladin A2", MatchKind::Exact),
    rule("Luna 2.0 AI", "Scubapro", "Luna 2.0 AI", MatchKind::Exact),
    rule("Luna 2.0", "Scubapro", "Luna 2.0", MatchKind::Exact),
    // Mares
    rule("Mares Genius", "Mares", "Genius", MatchKind::Exact),
    rule("Sirius", "Mares", "Sirius", MatchKind::Exact),
    rule("Quad Ci", "Mares", "Quad Ci", MatchKind::Exact),
    rule("Puck4", "Mares", "Puck 4", MatchKind::Exact),
    // Cressi devices advertise a serial suffix, so these use prefix or
    // substring matching.
    rule("CARESIO_", "Cressi", "Cartesio", MatchKind::Prefix),
    rule("GOA_", "Cressi", "Goa", MatchKind::Prefix),
    rule("Leonardo", "Cressi", "Leonardo 2.0", MatchKind::Contains),
    rule("Donatello", "Cressi", "Donatello", MatchKind::Contains),
    rule("Michelangelo", "Cressi", "Michelangelo", MatchKind::Contains),
    rule("Neon", "Cressi", "Neon", MatchKind::Contains),
    rule("Nepto", "Cressi", "Nepto", MatchKind::Contains),
    // Heinrichs Weikamp
    rule("OSTC 3", "Heinrichs Weikamp", "OSTC Plus", MatchKind::Exact),
    rule("OSTC s#", "Heinrichs Weikamp", "OSTC Sport", MatchKind::Exact),
    rule("OSTC s ", "Heinrichs Weikamp", "OSTC Sport", MatchKind::Exact),
    rule("OSTC 4-", "Heinrichs Weikamp", "OSTC 4", MatchKind::Exact),
    rule("OSTC 2-", "Heinrichs Weikamp", "OSTC 2N", MatchKind::Exact),
    rule("OSTC + ", "Heinrichs Weikamp", "OSTC 2", MatchKind::Exact),
    rule("OSTC", "Heinrichs Weikamp", "OSTC 2", MatchKind::Exact),
    // Deepblu
    rule("COSMIQ", "Deepblu", "Cosmiq+", MatchKind::Exact),
    // Oceans
    rule("S1", "Oceans", "S1", MatchKind::Exact),
    // McLean
    rule("McLean Extreme", "McLean", "Extreme", MatchKind::Exact),
    // Tecdiving
    rule("DiveComputer", "Tecdiving", "DiveComputer.eu", MatchKind::Exact),
    // Ratio
    rule("DS", "Ratio", "iX3M 2021 GPS Easy", MatchKind::Exact),
    rule("IX5M", "Ratio", "iX3M 2021 GPS Easy", MatchKind::Exact),
    rule("RATIO-", "Ratio", "iX3M 2021 GPS Easy", MatchKind::Exact),
];

/// Find the descriptor with exactly this (family, model) pair. The first
/// catalog entry that matches is authoritative.
pub fn resolve_by_family_model<C>(catalog: &C, family: Family, model: u32) -> DcResult<Descriptor>
where
    C: DescriptorCatalog + ?Sized,
{
    for descriptor in catalog.descriptors()? {
        if descriptor.family == family && descriptor.model == model {
            return Ok(descriptor);
        }
    }
    warn!(?family, model, "no matching descriptor");
    Err(DcError::Unsupported)
}

/// Resolve an advertised BLE name to a descriptor.
///
/// Phase 1 walks [`NAME_RULES`] in order; the first rule that matches the
/// name is looked up in the catalog by exact vendor/product equality. A
/// rule whose vendor/product has no catalog entry is a catalog gap, not a
/// query failure: the scan continues with the next rule. Phase 2 falls
/// back to the catalog's own filters, taking the first BLE-capable
/// descriptor that accepts the name.
pub fn resolve_by_name<C>(catalog: &C, name: &str) -> DcResult<Descriptor>
where
    C: DescriptorCatalog + ?Sized,
{
    if name.is_empty() {
        return Err(DcError::InvalidArgument("device name is empty".to_string()));
    }

    for rule in NAME_RULES {
        if !rule.matches(name) {
            continue;
        }
        for descriptor in catalog.descriptors()? {
            if descriptor.vendor == rule.vendor && descriptor.product == rule.product {
                return Ok(descriptor);
            }
        }
        debug!(
            pattern = rule.pattern,
            vendor = rule.vendor,
            product = rule.product,
            "rule matched but catalog has no such entry, trying next rule"
        );
    }

    for descriptor in catalog.descriptors()? {
        if descriptor.transports.contains(Transport::Ble)
            && descriptor.accepts(Transport::Ble, name)
        {
            return Ok(descriptor);
        }
    }

    warn!(name, "no matching descriptor for advertised name");
    Err(DcError::Unsupported)
}

/// Resolve a name to its (family, model) pair.
pub fn identify_from_name<C>(catalog: &C, name: &str) -> DcResult<(Family, u32)>
where
    C: DescriptorCatalog + ?Sized,
{
    let descriptor = resolve_by_name(catalog, name)?;
    Ok((descriptor.family, descriptor.model))
}

/// Resolve a name and format it as "Vendor Product". `None` if the name
/// does not resolve.
///
/// Formatting and resolution are not inverses: a formatted display name is
/// not guaranteed to resolve back to the same descriptor.
pub fn formatted_device_name<C>(catalog: &C, name: &str) -> Option<String>
where
    C: DescriptorCatalog + ?Sized,
{
    resolve_by_name(catalog, name).ok().map(|d| d.display_name())
}

/// Normalize a device-type string for use as a storage key, preferring the
/// catalog's product name over whatever the host recorded.
pub fn normalize_device_type<C>(catalog: &C, device_type: &str) -> String
where
    C: DescriptorCatalog + ?Sized,
{
    if let Ok(descriptor) = resolve_by_name(catalog, device_type) {
        return descriptor.product.to_string();
    }

    let components: Vec<&str> = device_type.split_whitespace().collect();
    if components.len() == 1 {
        return components[0].to_string();
    }

    // Strip serial numbers and other purely numeric tokens.
    let non_numeric: Vec<&str> = components
        .iter()
        .filter(|c| !c.chars().all(|ch| ch.is_ascii_digit()))
        .copied()
        .collect();
    match non_numeric.last() {
        Some(last) => last.to_string(),
        None => device_type.to_string(),
    }
}

/// First naming rule matching `name`, as a plain vendor/product record.
pub fn match_naming_rule(name: String) -> Option<RuleMatch> {
    NAME_RULES.iter().find(|rule| rule.matches(&name)).map(|rule| RuleMatch {
        vendor: rule.vendor.to_string(),
        product: rule.product.to_string(),
    })
}

/// Format a vendor and product as a display name.
pub fn format_display_name(vendor: String, product: String) -> String {
    format!("{vendor} {product}")
}
