//! Tests for the message log views.

#[cfg(test)]
mod tests {
    use crate::events::{CollectionEvent, EventBus};
    use crate::message_log::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        log: MessageLog,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let log = MessageLog::new(dir.path().join("log.txt"), EventBus::new());
        Fixture { _dir: dir, log }
    }

    fn history1(log: &mut MessageLog) {
        log.write_message(
            MessageKind::History,
            "TeamCollection.CheckoutMsg",
            "{0} checked out the book {1}",
            Some("joe@somewhere.org"),
            Some("Joe hunts pigs"),
        );
    }

    fn history2(log: &mut MessageLog) {
        log.write_message(
            MessageKind::History,
            "TeamCollection.BookCheckedIn",
            "You checked in the book {0}",
            Some("Ducks and Geese"),
            None,
        );
    }

    fn error1(log: &mut MessageLog, title: &str) {
        log.write_message(
            MessageKind::Error,
            "TeamCollection.ConflictingCheckout",
            "The book '{0}' is checked out to someone else. Your changes are saved to Lost-and-found.",
            Some(title),
            None,
        );
    }

    fn error2(log: &mut MessageLog) {
        log.write_message(
            MessageKind::Error,
            "TeamCollection.CheckedOutOn",
            "{0} checked out this book on {1}.",
            Some("fred@nowhere.org"),
            Some("Feb 25, 2021"),
        );
    }

    fn new_book(log: &mut MessageLog, title: &str) {
        log.write_message(
            MessageKind::NewStuff,
            "TeamCollection.BookArrived",
            "A new book called {0} was added to the collection",
            Some(title),
            None,
        );
    }

    fn changed_book(log: &mut MessageLog, title: &str) {
        log.write_message(
            MessageKind::NewStuff,
            "TeamCollection.BookChanged",
            "The book called {0} was changed",
            Some(title),
            None,
        );
    }

    fn clobber(log: &mut MessageLog, title: &str) {
        log.write_message(
            MessageKind::ClobberPending,
            "TeamCollection.BookClobbered",
            "The book called {0} was changed remotely, and your version has been clobbered",
            Some(title),
            None,
        );
    }

    fn params(messages: &[LogMessage]) -> Vec<Option<&str>> {
        messages.iter().map(|m| m.param0.as_deref()).collect()
    }

    #[test]
    fn write_message_then_read_back() {
        let mut f = fixture();
        history1(&mut f.log);
        error1(&mut f.log, "Joe hunts pigs");

        let messages = f.log.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind, MessageKind::History);
        assert_eq!(messages[0].l10n_id, "TeamCollection.CheckoutMsg");
        assert_eq!(messages[0].message, "{0} checked out the book {1}");
        assert_eq!(messages[0].param0.as_deref(), Some("joe@somewhere.org"));
        assert_eq!(messages[0].param1.as_deref(), Some("Joe hunts pigs"));
        assert_eq!(messages[1].kind, MessageKind::Error);
        assert_eq!(messages[1].param1, None);
    }

    #[test]
    fn current_errors_without_milestones() {
        let mut f = fixture();
        history1(&mut f.log);
        error1(&mut f.log, "Joe hunts pigs");
        error2(&mut f.log);

        let errors = f.log.current_errors();
        assert_eq!(params(&errors), vec![Some("Joe hunts pigs"), Some("fred@nowhere.org")]);
    }

    #[test]
    fn current_errors_since_log_displayed() {
        let mut f = fixture();
        history1(&mut f.log);
        error1(&mut f.log, "Joe hunts pigs");
        f.log.write_milestone(MessageKind::LogDisplayed);
        error2(&mut f.log);
        f.log.write_milestone(MessageKind::LogDisplayed);
        error1(&mut f.log, "Fred chases buffalo");
        history2(&mut f.log);
        error1(&mut f.log, "Dogs and Cats");

        let errors = f.log.current_errors();
        assert_eq!(params(&errors), vec![Some("Fred chases buffalo"), Some("Dogs and Cats")]);
    }

    #[test]
    fn current_errors_since_reloaded() {
        let mut f = fixture();
        history1(&mut f.log);
        error1(&mut f.log, "Joe hunts pigs");
        f.log.write_milestone(MessageKind::LogDisplayed);
        error2(&mut f.log);
        f.log.write_milestone(MessageKind::Reloaded);
        error1(&mut f.log, "Fred chases buffalo");
        history2(&mut f.log);
        error1(&mut f.log, "Dogs and Cats");

        let errors = f.log.current_errors();
        assert_eq!(params(&errors), vec![Some("Fred chases buffalo"), Some("Dogs and Cats")]);
    }

    #[test]
    fn error_no_reload_counts_as_error() {
        let mut f = fixture();
        f.log.write_message(
            MessageKind::ErrorNoReload,
            "TeamCollection.RemoteDeleteConflict",
            "{0} was deleted remotely",
            Some("Ducks"),
            None,
        );
        assert_eq!(f.log.current_errors().len(), 1);
        assert_eq!(f.log.team_collection_status(), CollectionStatus::Error);
    }

    #[test]
    fn current_new_stuff_without_milestones() {
        let mut f = fixture();
        new_book(&mut f.log, "I am new");
        history1(&mut f.log);
        changed_book(&mut f.log, "I am different");

        let news = f.log.current_new_stuff();
        assert_eq!(params(&news), vec![Some("I am new"), Some("I am different")]);
        assert_eq!(news[1].l10n_id, "TeamCollection.BookChanged");
    }

    #[test]
    fn current_new_stuff_since_reload() {
        let mut f = fixture();
        new_book(&mut f.log, "I am new");
        history1(&mut f.log);
        changed_book(&mut f.log, "I am different");
        f.log.write_milestone(MessageKind::Reloaded);
        new_book(&mut f.log, "Boys and girls");
        history1(&mut f.log);
        f.log.write_milestone(MessageKind::Reloaded);
        new_book(&mut f.log, "This is new since reload");
        history1(&mut f.log);
        changed_book(&mut f.log, "This is changed since reload");

        let news = f.log.current_new_stuff();
        assert_eq!(
            params(&news),
            vec![Some("This is new since reload"), Some("This is changed since reload")]
        );
    }

    #[test]
    fn write_message_publishes_status_changed() {
        let dir = TempDir::new().unwrap();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let mut log = MessageLog::new(dir.path().join("log.txt"), events);

        new_book(&mut log, "I am new");
        assert_eq!(rx.try_recv().unwrap(), CollectionEvent::StatusChanged);
    }

    #[test]
    fn write_milestone_publishes_status_changed() {
        let dir = TempDir::new().unwrap();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let mut log = MessageLog::new(dir.path().join("log.txt"), events);

        log.write_milestone(MessageKind::Reloaded);
        assert_eq!(rx.try_recv().unwrap(), CollectionEvent::StatusChanged);
    }

    #[test]
    fn write_message_stamps_current_time() {
        let mut f = fixture();
        let before = Utc::now() - Duration::seconds(1);
        new_book(&mut f.log, "I am new");
        let when = f.log.messages()[0].when;
        assert!(when >= before && when <= Utc::now());
    }

    #[test]
    fn clobber_message_none_in_list() {
        let mut f = fixture();
        new_book(&mut f.log, "I am new");
        error1(&mut f.log, "Joe hunts pigs");
        assert!(f.log.current_clobber_message().is_none());
    }

    #[test]
    fn clobber_message_two_in_list_returns_last() {
        let mut f = fixture();
        new_book(&mut f.log, "I am new");
        error1(&mut f.log, "Joe hunts pigs");
        clobber(&mut f.log, "I was clobbered");
        error2(&mut f.log);
        clobber(&mut f.log, "last clobber message");
        history1(&mut f.log);

        let message = f.log.current_clobber_message().unwrap();
        assert_eq!(message.kind, MessageKind::ClobberPending);
        assert_eq!(message.l10n_id, "TeamCollection.BookClobbered");
        assert_eq!(message.param0.as_deref(), Some("last clobber message"));
    }

    #[test]
    fn clobber_message_only_before_showed_clobbered() {
        let mut f = fixture();
        new_book(&mut f.log, "I am new");
        error1(&mut f.log, "Joe hunts pigs");
        clobber(&mut f.log, "I was clobbered");
        error2(&mut f.log);
        f.log.write_milestone(MessageKind::ShowedClobbered);
        history1(&mut f.log);
        assert!(f.log.current_clobber_message().is_none());
    }

    #[test]
    fn status_history_only_is_nominal() {
        let mut f = fixture();
        history1(&mut f.log);
        assert_eq!(f.log.team_collection_status(), CollectionStatus::Nominal);
    }

    #[test]
    fn status_new_stuff_without_errors() {
        let mut f = fixture();
        history1(&mut f.log);
        new_book(&mut f.log, "I am new");
        changed_book(&mut f.log, "I am different");
        history2(&mut f.log);
        assert_eq!(f.log.team_collection_status(), CollectionStatus::NewStuff);
    }

    #[test]
    fn status_messages_only_before_reload_is_nominal() {
        let mut f = fixture();
        history1(&mut f.log);
        new_book(&mut f.log, "I am new");
        error1(&mut f.log, "Joe hunts pigs");
        clobber(&mut f.log, "I was clobbered");
        f.log.write_milestone(MessageKind::Reloaded);
        assert_eq!(f.log.team_collection_status(), CollectionStatus::Nominal);
    }

    #[test]
    fn status_errors_since_log_displayed_beat_new_stuff() {
        let mut f = fixture();
        history1(&mut f.log);
        new_book(&mut f.log, "I am new");
        f.log.write_milestone(MessageKind::LogDisplayed);
        error1(&mut f.log, "Joe hunts pigs");
        changed_book(&mut f.log, "I am different");
        history2(&mut f.log);
        assert_eq!(f.log.team_collection_status(), CollectionStatus::Error);
    }

    #[test]
    fn status_clobber_pending_wins() {
        let mut f = fixture();
        history1(&mut f.log);
        new_book(&mut f.log, "I am new");
        clobber(&mut f.log, "I was clobbered");
        error1(&mut f.log, "Joe hunts pigs");
        changed_book(&mut f.log, "I am different");
        history2(&mut f.log);
        assert_eq!(f.log.team_collection_status(), CollectionStatus::ClobberPending);

        f.log.write_milestone(MessageKind::ShowedClobbered);
        assert_eq!(f.log.team_collection_status(), CollectionStatus::Error);
    }

    #[test]
    fn pretty_messages_skip_reload_and_display_milestones() {
        let mut f = fixture();
        history1(&mut f.log);
        new_book(&mut f.log, "I am new");
        f.log.write_milestone(MessageKind::Reloaded);
        error1(&mut f.log, "Joe hunts pigs");
        f.log.write_milestone(MessageKind::LogDisplayed);
        changed_book(&mut f.log, "I am different");
        f.log.write_milestone(MessageKind::ShowedClobbered);

        let today = chrono::Local::now().format("%x").to_string();
        let pretty = f.log.pretty_print_messages();
        assert_eq!(
            pretty,
            vec![
                (
                    MessageKind::History,
                    format!("{today}: joe@somewhere.org checked out the book Joe hunts pigs")
                ),
                (
                    MessageKind::NewStuff,
                    format!("{today}: A new book called I am new was added to the collection")
                ),
                (
                    MessageKind::Error,
                    format!("{today}: The book 'Joe hunts pigs' is checked out to someone else. Your changes are saved to Lost-and-found.")
                ),
                (
                    MessageKind::NewStuff,
                    format!("{today}: The book called I am different was changed")
                ),
                (MessageKind::ShowedClobbered, format!("{today}: Repaired conflict")),
            ]
        );
    }

    #[test]
    fn load_saved_messages_merges_without_duplicates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");
        let mut first = MessageLog::new(&path, EventBus::new());
        new_book(&mut first, "I am new");
        error1(&mut first, "Joe hunts pigs");
        first.write_milestone(MessageKind::LogDisplayed);
        error1(&mut first, "after error milestone");

        let mut second = MessageLog::new(&path, EventBus::new());
        assert!(second.messages().is_empty());
        error1(&mut second, "Problem after save");

        assert_eq!(second.load_saved_messages(), 4);
        assert_eq!(second.messages().len(), 5);
        assert_eq!(second.messages()[0].param0.as_deref(), Some("I am new"));
        assert_eq!(
            params(&second.current_errors()),
            vec![Some("after error milestone"), Some("Problem after save")]
        );

        assert_eq!(second.load_saved_messages(), 0);
        assert_eq!(second.messages().len(), 5);
    }
}
