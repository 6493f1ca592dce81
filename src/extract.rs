use anyhow::Result;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::db::Database;
use crate::models::{CompanyDraft, Employee, Event, Person, Sponsor};

/// Build one company record per distinct company mentioned by the event's
/// people and sponsors. Names are matched ignoring case and surrounding
/// whitespace; the first spelling seen is kept. Output is in first-mention
/// order.
pub fn extract_companies(people: &[Person], sponsors: &[Sponsor]) -> Vec<CompanyDraft> {
    let mut companies: Vec<CompanyDraft> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    let mut entry = |name: &str| -> usize {
        let key = name.to_lowercase();
        *index.entry(key).or_insert_with(|| {
            companies.push(CompanyDraft { name: name.to_string(), ..Default::default() });
            companies.len() - 1
        })
    };

    let mut employees: Vec<(usize, Employee)> = Vec::new();
    for person in people.iter().filter(|p| p.has_usable_name()) {
        let Some(company) = person.company.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
            continue;
        };
        let slot = entry(company);
        employees.push((
            slot,
            Employee {
                name: person.name.trim().to_string(),
                title: person.title.clone(),
                linkedin: person.linkedin.clone(),
            },
        ));
    }

    let mut sponsor_slots: Vec<(usize, String)> = Vec::new();
    for sponsor in sponsors {
        let name = sponsor.name.trim();
        if name.is_empty() {
            continue;
        }
        let slot = entry(name);
        sponsor_slots.push((slot, sponsor_description(sponsor)));
    }

    for (slot, employee) in employees {
        let list = &mut companies[slot].employees;
        if !list.iter().any(|e| e.name.eq_ignore_ascii_case(&employee.name)) {
            list.push(employee);
        }
    }

    for (slot, description) in sponsor_slots {
        let company = &mut companies[slot];
        let mentions_sponsor = company
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains("sponsor"));
        if !mentions_sponsor {
            company.description = Some(description);
        }
    }

    companies
        .into_iter()
        .filter(|c| !c.employees.is_empty() || c.description.as_deref().is_some_and(|d| !d.trim().is_empty()))
        .collect()
}

fn sponsor_description(sponsor: &Sponsor) -> String {
    match sponsor.tier.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(tier) => format!("{} sponsor", tier),
        None => "Event sponsor".to_string(),
    }
}

/// Derive companies from a synced event and merge them into the registry.
/// Runs strictly after the event sync; failures on one company do not stop
/// the rest.
pub fn merge_event_companies(db: &Database, event: &Event) -> Result<usize> {
    let drafts = extract_companies(&event.people, &event.sponsors);
    let mut merged = 0;
    for draft in &drafts {
        match db.merge_company(draft) {
            Ok(_) => merged += 1,
            Err(e) => warn!(company = %draft.name, error = %format!("{:#}", e), "Company merge failed"),
        }
    }
    info!(url = %event.url, derived = drafts.len(), merged, "Companies merged from event");
    Ok(merged)
}

/// Sync an event into the store, then fold its companies into the registry.
pub fn sync_event_and_companies(db: &Database, user_id: &str, event: &Event) -> Result<(i64, usize)> {
    let event_id = db.sync_event(user_id, event)?;
    let merged = merge_event_companies(db, event)?;
    Ok((event_id, merged))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str, company: &str) -> Person {
        Person {
            name: name.to_string(),
            company: Some(company.to_string()),
            title: Some("Engineer".to_string()),
            ..Default::default()
        }
    }

    fn sponsor(name: &str, tier: Option<&str>) -> Sponsor {
        Sponsor { name: name.to_string(), tier: tier.map(str::to_string) }
    }

    #[test]
    fn test_person_and_sponsor_merge() {
        let companies = extract_companies(&[person("Jo", "Acme")], &[sponsor("Acme", Some("Gold"))]);
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].name, "Acme");
        assert_eq!(companies[0].description.as_deref(), Some("Gold sponsor"));
        assert_eq!(companies[0].employees.len(), 1);
        assert_eq!(companies[0].employees[0].name, "Jo");
    }

    #[test]
    fn test_merge_is_order_independent() {
        let people = [person("Jo", "Acme"), person("Kim", "Globex")];
        let sponsors = [sponsor("Globex", Some("Silver")), sponsor("Acme", Some("Gold"))];
        let reversed_people: Vec<Person> = people.iter().rev().cloned().collect();
        let reversed_sponsors: Vec<Sponsor> = sponsors.iter().rev().cloned().collect();

        let mut a = extract_companies(&people, &sponsors);
        let mut b = extract_companies(&reversed_people, &reversed_sponsors);
        a.sort_by(|x, y| x.name.cmp(&y.name));
        b.sort_by(|x, y| x.name.cmp(&y.name));

        assert_eq!(a, b);
        assert_eq!(a[0].description.as_deref(), Some("Gold sponsor"));
        assert_eq!(a[1].description.as_deref(), Some("Silver sponsor"));
    }

    #[test]
    fn test_names_match_ignoring_case() {
        let companies = extract_companies(
            &[person("Jo", "Acme"), person("Ana", "ACME "), person("Kim", "Globex")],
            &[sponsor("acme", None)],
        );
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[0].name, "Acme");
        assert_eq!(companies[0].employees.len(), 2);
        assert_eq!(companies[0].description.as_deref(), Some("Event sponsor"));
        assert_eq!(companies[1].name, "Globex");
        assert_eq!(companies[1].description, None);
    }

    #[test]
    fn test_existing_sponsor_description_is_kept() {
        let companies = extract_companies(
            &[],
            &[sponsor("Acme", Some("Gold")), sponsor("Acme", Some("Silver"))],
        );
        assert_eq!(companies[0].description.as_deref(), Some("Gold sponsor"));
    }

    #[test]
    fn test_skips_blank_people_and_companies() {
        let companies = extract_companies(
            &[person("  ", "Acme"), person("Jo", "  "), person("Jo", "Initech"), person("Jo", "initech")],
            &[sponsor(" ", Some("Gold"))],
        );
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].name, "Initech");
        assert_eq!(companies[0].employees.len(), 1);
    }

    #[test]
    fn test_sync_event_and_companies() {
        let db = Database::open_in_memory().unwrap();
        let event = Event {
            url: "x.com/e".to_string(),
            display_url: "https://x.com/e".to_string(),
            name: "Summit".to_string(),
            date: None,
            start_date: None,
            end_date: None,
            location: None,
            description: None,
            estimated_attendees: None,
            people: vec![person("Jo", "Acme")],
            sponsors: vec![sponsor("Acme", Some("Gold"))],
            expected_personas: vec![],
            next_best_actions: vec![],
            related_events: vec![],
            analyzed_at: "2025-01-01T00:00:00Z".to_string(),
            last_viewed_at: None,
        };

        sync_event_and_companies(&db, "u1", &event).unwrap();
        sync_event_and_companies(&db, "u1", &event).unwrap();

        let acme = db.get_company("acme").unwrap().unwrap();
        assert_eq!(acme.description.as_deref(), Some("Gold sponsor"));
        assert_eq!(acme.employees.len(), 1);

        // deleting the event leaves the registry alone
        db.delete_event("u1", "https://x.com/e").unwrap();
        assert!(db.get_company("Acme").unwrap().is_some());
    }
}
