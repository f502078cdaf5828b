//! Behavior every writable backend must share.
//!
//! Runs against live databases that may already hold data, so every book it
//! creates carries a per-run tag in its subject and only tagged rows are
//! inspected. Rows are deleted again on success.

#![allow(dead_code)]

use bookcase::storage::{BookStorage, Deadline};
use bookcase::{Book, BookId, Filter, Header};
use chrono::NaiveDate;
use std::time::Duration;

/// A deadline generous enough for a remote test server.
pub fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(10))
}

/// Letters and digits only, so it is usable as a search term.
pub fn unique_tag() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Builds a book with the given identifying fields.
pub fn book(title: &str, author: &str, subject: &str, pages: u32) -> Book {
    Book {
        header: Header {
            id: BookId::default(),
            title: title.to_string(),
            author: author.to_string(),
            subject: subject.to_string(),
        },
        description: format!("About {title}"),
        dewey_dec_class: "000".to_string(),
        pages,
        publisher: "Test House".to_string(),
        publish_date: NaiveDate::from_ymd_opt(2001, 2, 3),
        added_date: None,
        ean_isbn13: "9780000000000".to_string(),
        upc_isbn10: "0000000000".to_string(),
        image_base64: "aW1hZ2U=".to_string(),
    }
}

fn titles(headers: &[Header]) -> Vec<(&str, &str)> {
    headers
        .iter()
        .map(|h| (h.title.as_str(), h.author.as_str()))
        .collect()
}

/// Exercises the whole storage contract against `storage`.
pub fn run_contract(storage: &dyn BookStorage) {
    let tag = unique_tag();
    let art = format!("Art{tag}");
    let zoo = format!("Zoo{tag}");

    assert!(storage.create_books(deadline(), &[]).unwrap().is_empty());

    let input = vec![
        book("Sculpture", "Ann Lee", &art, 120),
        book("Painting", "Bo Kim", &art, 80),
        book(&format!("Zebras{tag}"), "Cy Doe", &zoo, 40),
        book("Painting", "Second Author", &art, 60),
    ];
    let created = storage.create_books(deadline(), &input).unwrap();
    assert_eq!(created.len(), 4);
    for (made, given) in created.iter().zip(&input) {
        assert!(!made.id().is_empty());
        assert_eq!(made.header.title, given.header.title);
        assert!(made.added_date.is_some());
    }
    let mut ids: Vec<&str> = created.iter().map(|b| b.id().as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4, "ids are distinct");

    // Subject filter, sorted by title, ties in insertion order.
    let by_art = Filter::new("", art.clone()).unwrap();
    let headers = storage.read_book_headers(deadline(), &by_art, 10, 0).unwrap();
    assert_eq!(
        titles(&headers),
        [
            ("Painting", "Bo Kim"),
            ("Painting", "Second Author"),
            ("Sculpture", "Ann Lee"),
        ]
    );

    // Pagination over the same ordering.
    let first = storage.read_book_headers(deadline(), &by_art, 2, 0).unwrap();
    let rest = storage.read_book_headers(deadline(), &by_art, 2, 2).unwrap();
    assert_eq!(titles(&first), titles(&headers[..2]));
    assert_eq!(titles(&rest), titles(&headers[2..]));
    assert!(
        storage
            .read_book_headers(deadline(), &by_art, 2, 10)
            .unwrap()
            .is_empty()
    );

    // A term found in both subjects matches every tagged book, across subjects.
    let by_tag = Filter::new(&tag, "").unwrap();
    let headers = storage.read_book_headers(deadline(), &by_tag, 10, 0).unwrap();
    assert_eq!(headers.len(), 4);
    assert_eq!(headers[3].subject, zoo);

    let by_tag_upper = Filter::new(&tag.to_uppercase(), "").unwrap();
    assert_eq!(
        storage
            .read_book_headers(deadline(), &by_tag_upper, 10, 0)
            .unwrap()
            .len(),
        4,
        "terms are case-insensitive"
    );

    // Terms and subject combine: subject AND (any term).
    let sculpture = Filter::new("sculpture zebras", art.clone()).unwrap();
    let headers = storage.read_book_headers(deadline(), &sculpture, 10, 0).unwrap();
    assert_eq!(titles(&headers), [("Sculpture", "Ann Lee")]);

    // Subject counts.
    let subjects = storage.read_book_subjects(deadline(), 10_000, 0).unwrap();
    let count_of = |name: &str| subjects.iter().find(|s| s.name == name).map(|s| s.count);
    assert_eq!(count_of(&art), Some(3));
    assert_eq!(count_of(&zoo), Some(1));
    let names: Vec<&str> = subjects.iter().map(|s| s.name.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort_unstable();
    assert_eq!(names, sorted, "subjects are sorted by name");

    // Point read returns the full record.
    let painting = &created[1];
    assert_eq!(&storage.read_book(deadline(), painting.id()).unwrap(), painting);

    // Update without the image keeps the stored image.
    let mut changed = painting.clone();
    changed.header.title = "Painting Revised".to_string();
    changed.pages = 99;
    changed.image_base64 = "bmV3".to_string();
    storage.update_book(deadline(), &changed, false).unwrap();
    let stored = storage.read_book(deadline(), painting.id()).unwrap();
    assert_eq!(stored.header.title, "Painting Revised");
    assert_eq!(stored.pages, 99);
    assert_eq!(stored.image_base64, painting.image_base64);

    storage.update_book(deadline(), &changed, true).unwrap();
    let stored = storage.read_book(deadline(), painting.id()).unwrap();
    assert_eq!(stored.image_base64, "bmV3");

    let mut cleared = changed.clone();
    cleared.image_base64.clear();
    storage.update_book(deadline(), &cleared, true).unwrap();
    assert!(storage.read_book(deadline(), painting.id()).unwrap().image_base64.is_empty());
    storage.update_book(deadline(), &changed, true).unwrap();

    // Missing ids are reported as not found.
    let missing = BookId::new(format!("missing{tag}"));
    assert!(storage.read_book(deadline(), &missing).unwrap_err().is_not_found());
    let mut ghost = changed.clone();
    ghost.header.id = missing.clone();
    assert!(
        storage
            .update_book(deadline(), &ghost, true)
            .unwrap_err()
            .is_not_found()
    );
    assert!(storage.delete_book(deadline(), &missing).unwrap_err().is_not_found());

    // Invalid input in a batch writes nothing.
    let bad = vec![book("Valid", "A", &art, 10), book("Invalid", "B", &art, 0)];
    assert!(storage.create_books(deadline(), &bad).is_err());
    assert_eq!(
        storage
            .read_book_headers(deadline(), &by_art, 10, 0)
            .unwrap()
            .len(),
        3
    );

    // Administrator credential is an upsert.
    storage.update_admin_password(deadline(), b"first-hash").unwrap();
    storage.update_admin_password(deadline(), tag.as_bytes()).unwrap();
    assert_eq!(
        storage.read_admin_password(deadline()).unwrap(),
        tag.as_bytes()
    );

    // An expired deadline fails fast.
    let expired = Deadline::after(Duration::ZERO);
    assert!(storage.read_book(expired, painting.id()).unwrap_err().is_timeout());

    // Delete is exactly-once.
    for made in &created {
        storage.delete_book(deadline(), made.id()).unwrap();
    }
    assert!(storage.read_book(deadline(), painting.id()).unwrap_err().is_not_found());
    assert!(storage.delete_book(deadline(), painting.id()).unwrap_err().is_not_found());
    assert!(
        storage
            .read_book_headers(deadline(), &by_tag, 10, 0)
            .unwrap()
            .is_empty()
    );

    run_substring_scenario(storage);
}

/// Term matching is by substring of the whole value: short words, single
/// letters and subjects containing commas behave as in the flat file.
fn run_substring_scenario(storage: &dyn BookStorage) {
    let tag = unique_tag();
    let animals = format!("Animals {tag}");
    let astronomy = format!("Astronomy, Space {tag}");

    let created = storage
        .create_books(
            deadline(),
            &[
                book("Cats of the World", "Ann Lee", &animals, 300),
                book("Catalog of Stars", "Bo Kim", &astronomy, 200),
                book("Dogs", "Cy Doe", &animals, 100),
            ],
        )
        .unwrap();

    // Other data may live in the same database, so only tagged rows count.
    let tagged = |query: &str, subject: &str| -> Vec<(String, String)> {
        let filter = Filter::new(query, subject).unwrap();
        storage
            .read_book_headers(deadline(), &filter, 10_000, 0)
            .unwrap()
            .into_iter()
            .filter(|h| h.subject.ends_with(&tag))
            .map(|h| (h.title, h.subject))
            .collect()
    };

    assert_eq!(
        tagged("cat", ""),
        [
            ("Cats of the World".to_string(), animals.clone()),
            ("Catalog of Stars".to_string(), astronomy.clone()),
        ]
    );
    assert_eq!(tagged("OF", "").len(), 2, "common short words are searchable");
    assert_eq!(
        tagged("w", &animals),
        [("Cats of the World".to_string(), animals.clone())],
        "one letter is a valid term"
    );
    assert_eq!(tagged("", &astronomy).len(), 1, "a comma does not split the subject");
    assert_eq!(tagged("space", "").len(), 1, "terms match inside the subject");
    assert!(tagged("talo", &animals).is_empty());

    let subjects = storage.read_book_subjects(deadline(), 10_000, 0).unwrap();
    let count_of = |name: &str| subjects.iter().find(|s| s.name == name).map(|s| s.count);
    assert_eq!(count_of(&animals), Some(2));
    assert_eq!(count_of(&astronomy), Some(1));

    for made in &created {
        storage.delete_book(deadline(), made.id()).unwrap();
    }
}
