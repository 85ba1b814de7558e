//! Association compatibility table.
//!
//! A fixed bidirectional table of supported (source, target) record-type
//! pairs, each carrying the CRM association type identifier. Unsupported
//! pairs are rejected locally and never reach the external API.

use simcrm_types::job::RecordType;

const TABLE: &[(RecordType, RecordType, &str)] = &[
    (RecordType::Contact, RecordType::Company, "contact_to_company"),
    (RecordType::Company, RecordType::Contact, "company_to_contact"),
    (RecordType::Contact, RecordType::Deal, "contact_to_deal"),
    (RecordType::Deal, RecordType::Contact, "deal_to_contact"),
    (RecordType::Company, RecordType::Deal, "company_to_deal"),
    (RecordType::Deal, RecordType::Company, "deal_to_company"),
    (RecordType::Note, RecordType::Contact, "note_to_contact"),
    (RecordType::Note, RecordType::Company, "note_to_company"),
    (RecordType::Note, RecordType::Deal, "note_to_deal"),
    (RecordType::Task, RecordType::Contact, "task_to_contact"),
    (RecordType::Task, RecordType::Company, "task_to_company"),
    (RecordType::Task, RecordType::Deal, "task_to_deal"),
];

/// The CRM association type id for a (source, target) pair, if supported.
pub fn association_type(source: RecordType, target: RecordType) -> Option<&'static str> {
    TABLE
        .iter()
        .find(|(s, t, _)| *s == source && *t == target)
        .map(|(_, _, id)| *id)
}

/// Whether the pair is supported at all.
pub fn is_supported(source: RecordType, target: RecordType) -> bool {
    association_type(source, target).is_some()
}
