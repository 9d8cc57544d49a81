/// Normalizes a free-text name field to title case, one word at a time.
pub fn title_case(input: &str) -> String {
    input
        .to_lowercase()
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalizes_each_word() {
        assert_eq!(title_case("john doe"), "John Doe");
    }

    #[test]
    fn lowercases_the_rest() {
        assert_eq!(title_case("LAND ROVER"), "Land Rover");
        assert_eq!(title_case("tOyOtA"), "Toyota");
    }

    #[test]
    fn keeps_empty_input_empty() {
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn preserves_spacing() {
        assert_eq!(title_case("mini  cooper"), "Mini  Cooper");
    }
}
