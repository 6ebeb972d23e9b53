use std::sync::LazyLock;

use regex::Regex;

/// Circuits whose country spans several zones, keyed by (country, city).
const CITY_ZONES: &[(&str, &str, &str)] = &[
    ("united states", "indianapolis", "America/Indiana/Indianapolis"),
    ("united states", "detroit", "America/Detroit"),
    ("united states", "long beach", "America/Los_Angeles"),
    ("united states", "st. petersburg", "America/New_York"),
    ("united states", "st petersburg", "America/New_York"),
    ("united states", "phoenix", "America/Phoenix"),
    ("united states", "nashville", "America/Chicago"),
    ("united states", "miami", "America/New_York"),
    ("united states", "austin", "America/Chicago"),
    ("united states", "portland", "America/Los_Angeles"),
    ("united states", "milwaukee", "America/Chicago"),
    ("united states", "monterey", "America/Los_Angeles"),
    ("united states", "las vegas", "America/Los_Angeles"),
    ("united states", "daytona beach", "America/New_York"),
    ("united states", "sebring", "America/New_York"),
    ("united states", "watkins glen", "America/New_York"),
    ("canada", "toronto", "America/Toronto"),
    ("canada", "montreal", "America/Montreal"),
    ("canada", "edmonton", "America/Edmonton"),
    ("australia", "melbourne", "Australia/Melbourne"),
    ("australia", "adelaide", "Australia/Adelaide"),
    ("australia", "phillip island", "Australia/Melbourne"),
    ("australia", "bathurst", "Australia/Sydney"),
    ("brazil", "são paulo", "America/Sao_Paulo"),
    ("brazil", "sao paulo", "America/Sao_Paulo"),
    ("mexico", "mexico city", "America/Mexico_City"),
];

/// Countries that observe a single zone, so the city is not needed.
const COUNTRY_ZONES: &[(&str, &str)] = &[
    ("japan", "Asia/Tokyo"),
    ("united kingdom", "Europe/London"),
    ("italy", "Europe/Rome"),
    ("monaco", "Europe/Monaco"),
    ("belgium", "Europe/Brussels"),
    ("austria", "Europe/Vienna"),
    ("hungary", "Europe/Budapest"),
    ("netherlands", "Europe/Amsterdam"),
    ("spain", "Europe/Madrid"),
    ("germany", "Europe/Berlin"),
    ("france", "Europe/Paris"),
    ("finland", "Europe/Helsinki"),
    ("sweden", "Europe/Stockholm"),
    ("greece", "Europe/Athens"),
    ("singapore", "Asia/Singapore"),
    ("united arab emirates", "Asia/Dubai"),
    ("bahrain", "Asia/Bahrain"),
    ("saudi arabia", "Asia/Riyadh"),
    ("qatar", "Asia/Qatar"),
    ("china", "Asia/Shanghai"),
    ("azerbaijan", "Asia/Baku"),
];

fn canonical_country(country: &str) -> String {
    let lowered = country.trim().to_lowercase();
    match lowered.as_str() {
        "usa" | "us" | "u.s." | "u.s.a." | "united states of america" => "united states".into(),
        "uk" | "great britain" | "england" | "gb" => "united kingdom".into(),
        "uae" => "united arab emirates".into(),
        "the netherlands" | "holland" => "netherlands".into(),
        _ => lowered,
    }
}

/// Looks up the venue's zone from its country and city.
pub fn infer_timezone(country: Option<&str>, city: Option<&str>) -> Option<&'static str> {
    let country = canonical_country(country?);
    if let Some(city) = city {
        let city = city.trim().to_lowercase();
        if let Some((_, _, zone)) = CITY_ZONES
            .iter()
            .find(|(c, town, _)| *c == country && *town == city)
        {
            return Some(zone);
        }
    }
    COUNTRY_ZONES
        .iter()
        .find(|(c, _)| *c == country)
        .map(|(_, zone)| *zone)
}

static IANA_ZONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(Africa|America|Antarctica|Asia|Atlantic|Australia|Europe|Indian|Pacific|Etc)/[A-Za-z0-9_+\-]+(/[A-Za-z0-9_+\-]+)?$",
    )
    .expect("valid regex")
});

/// True when the value is shaped like an IANA `Area/Location` identifier.
pub fn is_iana_zone(value: &str) -> bool {
    value == "UTC" || IANA_ZONE.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn city_table_resolves_multi_zone_countries() {
        assert_eq!(
            infer_timezone(Some("USA"), Some("Indianapolis")),
            Some("America/Indiana/Indianapolis")
        );
        assert_eq!(
            infer_timezone(Some("Australia"), Some("Adelaide")),
            Some("Australia/Adelaide")
        );
        assert_eq!(infer_timezone(Some("United States"), Some("Nowhere")), None);
    }

    #[test]
    fn single_zone_countries_ignore_city() {
        assert_eq!(infer_timezone(Some("Japan"), None), Some("Asia/Tokyo"));
        assert_eq!(infer_timezone(Some("UK"), Some("Silverstone")), Some("Europe/London"));
        assert_eq!(infer_timezone(Some("UAE"), Some("Abu Dhabi")), Some("Asia/Dubai"));
        assert_eq!(infer_timezone(None, Some("Monza")), None);
    }

    #[test]
    fn iana_shape_check() {
        assert!(is_iana_zone("Europe/Rome"));
        assert!(is_iana_zone("America/Argentina/Buenos_Aires"));
        assert!(is_iana_zone("UTC"));
        assert!(!is_iana_zone("CET"));
        assert!(!is_iana_zone("GMT+2"));
        assert!(!is_iana_zone("Europe Rome"));
    }
}
