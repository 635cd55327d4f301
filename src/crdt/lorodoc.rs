use loro::{ExportMode, LoroDoc, ToJson};

use super::{MergeDocument, MergeEngine, MergeError};

/// Merge engine backed by a Loro document
#[derive(Debug, Default, Clone, Copy)]
pub struct LoroMergeEngine;

impl MergeEngine for LoroMergeEngine {
    fn new_document(&self) -> Box<dyn MergeDocument> {
        Box::new(LoroDocument { doc: LoroDoc::new() })
    }

    fn name(&self) -> &'static str {
        "loro"
    }
}

pub struct LoroDocument {
    doc: LoroDoc,
}

impl MergeDocument for LoroDocument {
    fn apply_update(&mut self, block: &[u8]) -> Result<(), MergeError> {
        // Blocks whose dependencies are missing are kept pending by loro and
        // applied once the missing blocks arrive.
        self.doc
            .import(block)
            .map(|_| ())
            .map_err(|e| MergeError::Apply(e.to_string()))
    }

    fn encode_state(&self) -> Result<Vec<u8>, MergeError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| MergeError::Encode(e.to_string()))
    }

    fn to_json(&self) -> serde_json::Value {
        self.doc.get_deep_value().to_json_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::restore;
    use serde_json::json;

    fn text_update(peer: u64, pos: usize, text: &str) -> Vec<u8> {
        let author = LoroDoc::new();
        author.set_peer_id(peer).unwrap();
        author.get_text("text").insert(pos, text).unwrap();
        author.commit();
        author.export(ExportMode::all_updates()).unwrap()
    }

    fn apply_all(blocks: &[&Vec<u8>]) -> Box<dyn MergeDocument> {
        let mut doc = LoroMergeEngine.new_document();
        for block in blocks {
            doc.apply_update(block).unwrap();
        }
        doc
    }

    #[test]
    fn merge_is_order_independent() {
        let a = text_update(1, 0, "field ");
        let b = text_update(2, 0, "notes");
        let c = {
            let author = LoroDoc::new();
            author.set_peer_id(3).unwrap();
            author.get_map("meta").insert("site", "north ridge").unwrap();
            author.commit();
            author.export(ExportMode::all_updates()).unwrap()
        };

        let forward = apply_all(&[&a, &b, &c]);
        let backward = apply_all(&[&c, &b, &a]);
        let shuffled = apply_all(&[&b, &c, &a]);

        assert_eq!(forward.to_json(), backward.to_json());
        assert_eq!(forward.to_json(), shuffled.to_json());
        assert_eq!(forward.to_json()["meta"], json!({"site": "north ridge"}));
    }

    #[test]
    fn reapplying_a_block_is_a_no_op() {
        let a = text_update(1, 0, "plot 7");
        let once = apply_all(&[&a]);
        let twice = apply_all(&[&a, &a]);
        assert_eq!(once.to_json(), twice.to_json());
        assert_eq!(once.to_json()["text"], json!("plot 7"));
    }

    #[test]
    fn encoded_state_restores_the_same_content() {
        let a = text_update(1, 0, "soil sample");
        let b = text_update(2, 0, "wet ");
        let source_doc = apply_all(&[&a, &b]);

        let state = source_doc.encode_state().unwrap();
        let restored = restore(&LoroMergeEngine, &state).unwrap();
        assert_eq!(source_doc.to_json(), restored.to_json());
    }

    #[test]
    fn garbage_is_rejected() {
        let mut doc = LoroMergeEngine.new_document();
        assert!(doc.apply_update(b"definitely not loro").is_err());
    }
}
