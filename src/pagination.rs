use crate::{Error, Result};
use serde::Serialize;

/// How many dishes a category listing shows at once.
pub const DISHES_PER_PAGE: usize = 2;

pub struct Page<T> {
    pub items: Vec<T>,
    pub info: PageInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub number: usize,
    pub num_pages: usize,
    pub count: usize,
    pub has_next: bool,
    pub has_previous: bool,
    pub next_page_number: Option<usize>,
    pub previous_page_number: Option<usize>,
}

impl PageInfo {
    pub fn is_paginated(&self) -> bool {
        self.num_pages > 1
    }
}

/// Cuts out page `requested` (1-based, or `last`) of `items`. An empty sequence still has one
/// empty page; anything else outside the range is not found.
pub fn paginate<T>(items: Vec<T>, per_page: usize, requested: Option<&str>) -> Result<Page<T>> {
    let count = items.len();
    let num_pages = count.div_ceil(per_page).max(1);

    let number = match requested.map(str::trim).filter(|p| !p.is_empty()) {
        None => 1,
        Some("last") => num_pages,
        Some(p) => p.parse::<usize>().map_err(|_| Error::NotFound)?,
    };
    if number == 0 || number > num_pages {
        return Err(Error::NotFound);
    }

    let items = items
        .into_iter()
        .skip((number - 1) * per_page)
        .take(per_page)
        .collect();
    Ok(Page {
        items,
        info: PageInfo {
            number,
            num_pages,
            count,
            has_next: number < num_pages,
            has_previous: number > 1,
            next_page_number: (number < num_pages).then_some(number + 1),
            previous_page_number: (number > 1).then(|| number - 1),
        },
    })
}

#[test]
fn pages_of_two() {
    for n in 0..=7usize {
        let page = paginate((0..n).collect(), DISHES_PER_PAGE, None).unwrap();
        assert_eq!(page.info.is_paginated(), n > 2, "n = {n}");
        if n > 0 {
            assert_eq!(page.info.num_pages, n.div_ceil(2));
        }
        assert_eq!(page.items.len(), n.min(2));
    }
}

#[test]
fn last_page() {
    let page = paginate(vec!['a', 'b', 'c', 'd', 'e'], 2, Some("last")).unwrap();
    assert_eq!(page.items, vec!['e']);
    assert_eq!(page.info.number, 3);
    assert!(!page.info.has_next);
    assert_eq!(page.info.previous_page_number, Some(2));

    let page = paginate(vec!['a', 'b', 'c'], 2, Some("1")).unwrap();
    assert_eq!(page.items, vec!['a', 'b']);
    assert_eq!(page.info.next_page_number, Some(2));
}

#[test]
fn empty_has_one_page() {
    let page = paginate(Vec::<u8>::new(), 2, Some("1")).unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.info.num_pages, 1);
    assert!(!page.info.is_paginated());
}

#[test]
fn bad_pages_not_found() {
    for bad in ["0", "3", "two", "-1"] {
        assert!(matches!(
            paginate(vec![1, 2, 3], 2, Some(bad)),
            Err(Error::NotFound)
        ));
    }
}
