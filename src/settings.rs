use crate::query::{CategorySet, OrderBy};

pub const CATEGORY_CHOICES: [(&str, &str); 6] = [
    ("science", "Science"),
    ("technology", "Technology"),
    ("engineering", "Engineering"),
    ("mathematics", "Mathematics"),
    ("environment", "Environment"),
    ("space", "Space"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

impl Choice {
    fn new(value: &str, label: &str) -> Self {
        Self {
            value: value.to_string(),
            label: label.to_string(),
        }
    }
}

/// A user-editable setting: either one option out of many, or any non-empty subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preference {
    Single {
        title: &'static str,
        choices: Vec<Choice>,
        selected: usize,
    },
    Multi {
        title: &'static str,
        choices: Vec<Choice>,
        selected: Vec<bool>,
    },
}

impl Preference {
    pub fn title(&self) -> &'static str {
        match self {
            Preference::Single { title, .. } | Preference::Multi { title, .. } => *title,
        }
    }

    pub fn choices(&self) -> &[Choice] {
        match self {
            Preference::Single { choices, .. } | Preference::Multi { choices, .. } => choices,
        }
    }

    pub fn is_selected(&self, index: usize) -> bool {
        match self {
            Preference::Single { selected, .. } => *selected == index,
            Preference::Multi { selected, .. } => selected.get(index).copied().unwrap_or(false),
        }
    }

    /// Single choice: select `index`. Multi choice: flip `index`.
    pub fn toggle(&mut self, index: usize) {
        match self {
            Preference::Single {
                choices, selected, ..
            } => {
                if index < choices.len() {
                    *selected = index;
                }
            }
            Preference::Multi { selected, .. } => {
                if let Some(flag) = selected.get_mut(index) {
                    *flag = !*flag;
                }
            }
        }
    }

    /// A multi choice with nothing ticked cannot be saved.
    pub fn is_valid(&self) -> bool {
        match self {
            Preference::Single { .. } => true,
            Preference::Multi { selected, .. } => selected.iter().any(|flag| *flag),
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Preference::Single {
                choices, selected, ..
            } => choices
                .get(*selected)
                .map(|choice| choice.label.clone())
                .unwrap_or_default(),
            Preference::Multi {
                choices, selected, ..
            } => {
                let labels: Vec<&str> = choices
                    .iter()
                    .zip(selected)
                    .filter(|(_, flag)| **flag)
                    .map(|(choice, _)| choice.label.as_str())
                    .collect();
                if labels.is_empty() {
                    "None selected".to_string()
                } else {
                    labels.join(", ")
                }
            }
        }
    }

    fn selected_values(&self) -> Vec<&str> {
        self.choices()
            .iter()
            .enumerate()
            .filter(|(idx, _)| self.is_selected(*idx))
            .map(|(_, choice)| choice.value.as_str())
            .collect()
    }
}

/// The two feed preferences, edited together in the settings menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    pub order_by: Preference,
    pub categories: Preference,
}

impl FeedSettings {
    pub fn new(order_by: OrderBy, categories: &CategorySet) -> Self {
        let order_choices: Vec<Choice> = OrderBy::ALL
            .iter()
            .map(|order| Choice::new(order.as_str(), order.display_name()))
            .collect();
        let order_selected = OrderBy::ALL
            .iter()
            .position(|order| *order == order_by)
            .unwrap_or(0);

        let mut category_choices: Vec<Choice> = CATEGORY_CHOICES
            .iter()
            .map(|(value, label)| Choice::new(value, label))
            .collect();
        for keyword in categories.iter() {
            if !category_choices.iter().any(|choice| choice.value == keyword) {
                category_choices.push(Choice::new(keyword, keyword));
            }
        }
        let category_selected = category_choices
            .iter()
            .map(|choice| categories.contains(&choice.value))
            .collect();

        Self {
            order_by: Preference::Single {
                title: "Order by",
                choices: order_choices,
                selected: order_selected,
            },
            categories: Preference::Multi {
                title: "Categories",
                choices: category_choices,
                selected: category_selected,
            },
        }
    }

    pub fn preferences(&self) -> [&Preference; 2] {
        [&self.order_by, &self.categories]
    }

    pub fn preference_mut(&mut self, index: usize) -> Option<&mut Preference> {
        match index {
            0 => Some(&mut self.order_by),
            1 => Some(&mut self.categories),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.order_by.is_valid() && self.categories.is_valid()
    }

    pub fn selected_order(&self) -> OrderBy {
        self.order_by
            .selected_values()
            .first()
            .and_then(|value| OrderBy::from_key(value))
            .unwrap_or_default()
    }

    pub fn selected_categories(&self) -> CategorySet {
        self.categories.selected_values().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> FeedSettings {
        let categories: CategorySet = ["technology", "science"].into_iter().collect();
        FeedSettings::new(OrderBy::Relevance, &categories)
    }

    #[test]
    fn summaries_use_labels() {
        let settings = settings();
        assert_eq!(settings.order_by.summary(), "Relevance");
        assert_eq!(settings.categories.summary(), "Science, Technology");
    }

    #[test]
    fn unknown_configured_category_becomes_a_choice() {
        let categories: CategorySet = ["astrophysics"].into_iter().collect();
        let settings = FeedSettings::new(OrderBy::Newest, &categories);
        assert_eq!(settings.categories.summary(), "astrophysics");
        assert_eq!(settings.selected_categories(), categories);
    }

    #[test]
    fn toggling_updates_selection() {
        let mut settings = settings();
        settings.preference_mut(0).unwrap().toggle(0);
        assert_eq!(settings.selected_order(), OrderBy::Newest);

        settings.preference_mut(1).unwrap().toggle(3);
        assert_eq!(
            settings.selected_categories().iter().collect::<Vec<_>>(),
            ["science", "technology", "mathematics"]
        );
    }

    #[test]
    fn empty_category_selection_is_invalid() {
        let mut settings = settings();
        let categories = settings.preference_mut(1).unwrap();
        categories.toggle(0);
        categories.toggle(1);
        assert!(!categories.is_valid());
        assert_eq!(categories.summary(), "None selected");
        assert!(!settings.is_valid());
    }
}
