//! Page slicing and navigation bullets for browsing long result sets.
//!
//! Neither the page slice nor the bullet list is computed until first
//! access; both are cached on the paginator afterwards.

use std::cell::OnceCell;

pub const DEFAULT_PER_PAGE: usize = 20;
pub const DEFAULT_BULLET_WINDOW: usize = 5;

/// A counted, sliceable collection
pub trait PageSource {
    type Item;

    fn total_count(&self) -> usize;

    /// Items in `[start, end)`; both bounds are within `0..=total_count()`
    fn slice(&self, start: usize, end: usize) -> Vec<Self::Item>;
}

impl<T: Clone> PageSource for [T] {
    type Item = T;

    fn total_count(&self) -> usize {
        self.len()
    }

    fn slice(&self, start: usize, end: usize) -> Vec<T> {
        self[start..end].to_vec()
    }
}

impl<T: Clone> PageSource for Vec<T> {
    type Item = T;

    fn total_count(&self) -> usize {
        self.len()
    }

    fn slice(&self, start: usize, end: usize) -> Vec<T> {
        self[start..end].to_vec()
    }
}

/// One page already fetched from an asynchronous store.
///
/// Callers fetch `Paginator::window(page, per_page)` themselves and wrap the
/// rows together with the total count.
#[derive(Debug, Clone)]
pub struct PreloadedPage<T> {
    pub total: usize,
    pub offset: usize,
    pub items: Vec<T>,
}

impl<T: Clone> PageSource for PreloadedPage<T> {
    type Item = T;

    fn total_count(&self) -> usize {
        self.total
    }

    fn slice(&self, start: usize, end: usize) -> Vec<T> {
        let from = start.saturating_sub(self.offset).min(self.items.len());
        let to = end.saturating_sub(self.offset).min(self.items.len());
        self.items[from..to].to_vec()
    }
}

/// A navigation link to one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bullet {
    pub number: usize,
    pub link: String,
    pub active: bool,
}

pub struct Paginator<'a, S: PageSource + ?Sized> {
    source: &'a S,
    page: i64,
    per_page: usize,
    bullet_window: usize,
    total_count: usize,
    link: Box<dyn Fn(usize) -> String + 'a>,
    objects: OnceCell<Vec<S::Item>>,
    bullets: OnceCell<Vec<Bullet>>,
}

impl<'a, S: PageSource + ?Sized> Paginator<'a, S> {
    /// `page` is 1-based. Pages outside `1..=pages_count` are accepted and
    /// produce an empty slice.
    pub fn new<F>(source: &'a S, page: i64, link: F) -> Self
    where
        F: Fn(usize) -> String + 'a,
    {
        Self {
            total_count: source.total_count(),
            source,
            page,
            per_page: DEFAULT_PER_PAGE,
            bullet_window: DEFAULT_BULLET_WINDOW,
            link: Box::new(link),
            objects: OnceCell::new(),
            bullets: OnceCell::new(),
        }
    }

    pub fn per_page(mut self, per_page: usize) -> Self {
        self.per_page = per_page.max(1);
        self.objects = OnceCell::new();
        self.bullets = OnceCell::new();
        self
    }

    pub fn bullet_window(mut self, bullet_window: usize) -> Self {
        self.bullet_window = bullet_window.max(1);
        self.bullets = OnceCell::new();
        self
    }

    /// Offset and limit of `page` for stores that fetch their own rows
    pub fn window(page: i64, per_page: usize) -> (usize, usize) {
        let per_page = per_page.max(1);
        let offset = if page < 1 {
            0
        } else {
            (page as usize - 1).saturating_mul(per_page)
        };
        (offset, per_page)
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    /// Number of pages; an empty collection still has one (empty) page.
    pub fn pages_count(&self) -> usize {
        self.total_count.div_ceil(self.per_page).max(1)
    }

    /// Offset and end of the current page, clamped to the collection
    pub fn range(&self) -> (usize, usize) {
        if self.page < 1 {
            return (0, 0);
        }
        let start = (self.page as usize - 1)
            .saturating_mul(self.per_page)
            .min(self.total_count);
        let end = (self.page as usize)
            .saturating_mul(self.per_page)
            .min(self.total_count);
        (start, end)
    }

    pub fn objects(&self) -> &[S::Item] {
        self.objects.get_or_init(|| {
            let (start, end) = self.range();
            self.source.slice(start, end)
        })
    }

    pub fn bullets(&self) -> &[Bullet] {
        self.bullets.get_or_init(|| self.compute_bullets())
    }

    pub fn is_first(&self) -> bool {
        self.page == 1
    }

    pub fn is_last(&self) -> bool {
        self.page == self.pages_count() as i64
    }

    pub fn has_pages(&self) -> bool {
        self.pages_count() != 1
    }

    pub fn first_bullet(&self) -> Bullet {
        self.bullet(1, false)
    }

    pub fn last_bullet(&self) -> Bullet {
        self.bullet(self.pages_count(), false)
    }

    fn bullet(&self, number: usize, active: bool) -> Bullet {
        Bullet {
            number,
            link: (self.link)(number),
            active,
        }
    }

    fn compute_bullets(&self) -> Vec<Bullet> {
        let pages = self.pages_count() as i64;
        let width = self.bullet_window as i64;
        let current = self.page.clamp(1, pages);

        let mut first = current - width / 2;
        let mut last = first + width - 1;
        if last > pages {
            first -= last - pages;
            last = pages;
        }
        if first < 1 {
            last = (last + (1 - first)).min(pages);
            first = 1;
        }

        (first..=last)
            .map(|n| self.bullet(n as usize, n == self.page))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    fn link(n: usize) -> String {
        format!("/campaigns/{}/", n)
    }

    #[test]
    fn test_pages_count_partial_last_page() {
        let data = items(45);
        let paginator = Paginator::new(&data, 1, link).per_page(20);
        assert_eq!(paginator.pages_count(), 3);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_page() {
        let data = items(40);
        let paginator = Paginator::new(&data, 1, link).per_page(20);
        assert_eq!(paginator.pages_count(), 2);

        let empty: Vec<usize> = Vec::new();
        assert_eq!(Paginator::new(&empty, 1, link).pages_count(), 1);
    }

    #[test]
    fn test_objects_slices_first_and_last_page() {
        let data = items(45);

        let first = Paginator::new(&data, 1, link).per_page(20);
        assert_eq!(first.objects(), &data[0..20]);

        let last = Paginator::new(&data, 3, link).per_page(20);
        assert_eq!(last.objects(), &data[40..45]);
        assert!(last.is_last());
        assert!(!last.is_first());
    }

    #[test]
    fn test_out_of_range_pages_are_empty() {
        let data = items(45);
        assert!(Paginator::new(&data, 0, link).objects().is_empty());
        assert!(Paginator::new(&data, -3, link).objects().is_empty());
        assert!(Paginator::new(&data, 9, link).objects().is_empty());
    }

    #[test]
    fn test_bullets_clamped_at_last_page() {
        let data = items(45);
        let paginator = Paginator::new(&data, 3, link).per_page(20).bullet_window(5);
        let numbers: Vec<usize> = paginator.bullets().iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let active: Vec<usize> = paginator
            .bullets()
            .iter()
            .filter(|b| b.active)
            .map(|b| b.number)
            .collect();
        assert_eq!(active, vec![3]);
    }

    #[test]
    fn test_bullets_centered_window() {
        let data = items(200);
        let paginator = Paginator::new(&data, 5, link).per_page(20);
        let numbers: Vec<usize> = paginator.bullets().iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![3, 4, 5, 6, 7]);
        assert_eq!(paginator.bullets()[2].link, "/campaigns/5/");

        let start = Paginator::new(&data, 1, link).per_page(20);
        let numbers: Vec<usize> = start.bullets().iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_first_and_last_bullets() {
        let data = items(45);
        let paginator = Paginator::new(&data, 2, link).per_page(20);
        assert_eq!(paginator.first_bullet().number, 1);
        assert_eq!(paginator.last_bullet().number, 3);
        assert_eq!(paginator.last_bullet().link, "/campaigns/3/");
        assert!(paginator.has_pages());
    }

    #[test]
    fn test_preloaded_page_source() {
        let (offset, limit) = Paginator::<Vec<usize>>::window(3, 20);
        assert_eq!((offset, limit), (40, 20));

        let page = PreloadedPage {
            total: 45,
            offset,
            items: (40..45).collect::<Vec<usize>>(),
        };
        let paginator = Paginator::new(&page, 3, link).per_page(20);
        assert_eq!(paginator.objects(), &[40, 41, 42, 43, 44]);
        assert_eq!(paginator.pages_count(), 3);
    }
}
