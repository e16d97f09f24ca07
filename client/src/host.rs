//! Host-authoritative shared content
//!
//! Only the host ever runs a [`ContentGenerator`]. It broadcasts the result in
//! `START` and the guest adopts that copy verbatim, so both peers converge on
//! identical content without any agreement protocol. A guest whose host never
//! sends `START` simply waits.

use log::{debug, warn};
use rand::Rng;

/// Non-deterministic content generation (question draws, chain assignment, shuffles)
pub trait ContentGenerator {
    type Content: Clone;

    fn generate<R: Rng + ?Sized>(&self, participants: &[String], rng: &mut R) -> Self::Content;
}

pub struct HostAuthority<G: ContentGenerator> {
    generator: G,
    published: Option<G::Content>,
}

impl<G: ContentGenerator> HostAuthority<G> {
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            published: None,
        }
    }

    /// Generates the match content on first call; later calls return the same copy
    pub fn publish<R: Rng + ?Sized>(&mut self, participants: &[String], rng: &mut R) -> &G::Content {
        if self.published.is_none() {
            debug!("Generating shared content for {} participants", participants.len());
        }
        self.published
            .get_or_insert_with(|| self.generator.generate(participants, rng))
    }

    pub fn content(&self) -> Option<&G::Content> {
        self.published.as_ref()
    }
}

pub struct GuestView<C> {
    content: Option<C>,
}

impl<C: Clone> GuestView<C> {
    pub fn new() -> Self {
        Self { content: None }
    }

    /// Adopts the host's broadcast. Only the first `START` counts.
    pub fn accept(&mut self, content: C) -> bool {
        if self.content.is_some() {
            warn!("Ignoring repeated START from host");
            return false;
        }
        self.content = Some(content);
        true
    }

    pub fn content(&self) -> Option<&C> {
        self.content.as_ref()
    }
}

impl<C: Clone> Default for GuestView<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// The local player's part in a session
pub enum Role<G: ContentGenerator> {
    Host(HostAuthority<G>),
    Guest(GuestView<G::Content>),
}

impl<G: ContentGenerator> Role<G> {
    pub fn assign(local_id: &str, host_id: &str, generator: G) -> Self {
        if local_id == host_id {
            Role::Host(HostAuthority::new(generator))
        } else {
            Role::Guest(GuestView::new())
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Role::Host(_))
    }

    pub fn content(&self) -> Option<&G::Content> {
        match self {
            Role::Host(host) => host.content(),
            Role::Guest(guest) => guest.content(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    struct Shuffler;

    impl ContentGenerator for Shuffler {
        type Content = Vec<String>;

        fn generate<R: Rng + ?Sized>(&self, participants: &[String], rng: &mut R) -> Vec<String> {
            let mut order = participants.to_vec();
            order.shuffle(rng);
            order
        }
    }

    fn participants() -> Vec<String> {
        (0..8).map(|i| format!("p{}", i)).collect()
    }

    #[test]
    fn test_host_content_is_fixed_after_publish() {
        let mut host = HostAuthority::new(Shuffler);
        let mut rng = StdRng::seed_from_u64(7);

        let first = host.publish(&participants(), &mut rng).clone();
        let second = host.publish(&participants(), &mut rng).clone();
        assert_eq!(first, second);
        assert_eq!(host.content(), Some(&first));
    }

    #[test]
    fn test_guest_keeps_first_start() {
        let mut guest = GuestView::new();
        assert!(guest.accept(vec!["a".to_string()]));
        assert!(!guest.accept(vec!["b".to_string()]));
        assert_eq!(guest.content(), Some(&vec!["a".to_string()]));
    }

    #[test]
    fn test_role_assignment() {
        let host: Role<Shuffler> = Role::assign("amy", "amy", Shuffler);
        let guest: Role<Shuffler> = Role::assign("bob", "amy", Shuffler);
        assert!(host.is_host());
        assert!(!guest.is_host());
        assert!(guest.content().is_none());
    }
}
