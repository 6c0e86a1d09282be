use std::collections::BTreeMap;

// BC Assessment neighbourhood codes used by the City of Vancouver
const NEIGHBOURHOOD_NAMES: [(u32, &str); 30] = [
    (1, "West Point Grey"),
    (2, "Kitsilano"),
    (3, "Dunbar-Southlands"),
    (4, "Arbutus Ridge"),
    (5, "Kerrisdale"),
    (6, "Southlands"),
    (7, "Fairview"),
    (8, "Shaughnessy"),
    (9, "South Cambie-Main"),
    (10, "South Granville-Oakridge West"),
    (11, "East Oakridge"),
    (12, "Marpole"),
    (13, "Mount Pleasant, Strathcona"),
    (14, "Grandview-Woodland"),
    (15, "Dickens"),
    (16, "Main-Riley Park"),
    (17, "Sunset"),
    (18, "Marine Drive"),
    (19, "Kensington-Cedar Cottage"),
    (20, "North Hastings-Sunrise"),
    (21, "South Hastings-Sunrise"),
    (22, "Renfrew Heights"),
    (23, "Renfrew-Collingwood"),
    (24, "Killarney"),
    (25, "Champlain Heights"),
    (26, "Downtown"),
    (27, "West End"),
    (28, "Waterfront"),
    (29, "Yaletown North"),
    (30, "Yaletown"),
];

pub fn known_name(code: u32) -> Option<&'static str> {
    NEIGHBOURHOOD_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Human readable name, falling back to "Neighbourhood <code>".
pub fn display_name(code: u32) -> String {
    known_name(code)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Neighbourhood {}", code))
}

/// Display name -> code and code -> display name for the given codes.
pub fn build_neighbourhood_maps(
    codes: impl IntoIterator<Item = u32>,
) -> (BTreeMap<String, u32>, BTreeMap<u32, String>) {
    let mut display_to_code = BTreeMap::new();
    for code in codes {
        display_to_code.insert(display_name(code), code);
    }
    let code_to_display = display_to_code
        .iter()
        .map(|(name, code)| (*code, name.clone()))
        .collect();
    (display_to_code, code_to_display)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(display_name(27), "West End");
        assert_eq!(display_name(42), "Neighbourhood 42");
        assert_eq!(known_name(0), None);
    }

    #[test]
    fn test_maps_round_trip() {
        let (to_code, to_name) = build_neighbourhood_maps(vec![7, 42, 13]);

        assert_eq!(to_code["Fairview"], 7);
        assert_eq!(to_code["Neighbourhood 42"], 42);
        assert_eq!(to_name[&13], "Mount Pleasant, Strathcona");
        assert_eq!(to_name.len(), 3);
    }
}
