// Edge-case tests for the persistence coordinator
// Run with: cargo test --lib database::tests

#[cfg(test)]
mod save_tests {
    use crate::database::{Database, NewSegment, TranscriptStatus, TranscriptionResult, WordTimestamp};
    use tempfile::TempDir;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).unwrap();
        (db, temp_dir)
    }

    fn setup_db_with_media() -> (Database, TempDir, i64) {
        let (db, temp) = setup_test_db();
        let file_id = db.register_media("/tmp/audio.wav", "en").unwrap();
        (db, temp, file_id)
    }

    fn result_with_segments(count: usize) -> TranscriptionResult {
        TranscriptionResult {
            raw_text: "full text".to_string(),
            language: "en".to_string(),
            duration_seconds: Some(count as f64 * 2.0),
            segments: (0..count)
                .map(|i| NewSegment {
                    start_time: i as f64 * 2.0,
                    end_time: (i + 1) as f64 * 2.0,
                    text: format!("segment {}", i),
                    word_timestamps: None,
                })
                .collect(),
        }
    }

    // =========================================================================
    // Transactional save
    // =========================================================================

    #[test]
    fn test_save_creates_transcript_and_segments() {
        let (db, _temp, file_id) = setup_db_with_media();

        let transcript_id = db
            .save_transcription_result(file_id, &result_with_segments(3))
            .unwrap();
        assert!(transcript_id > 0);

        let transcript = db.get_transcript_for_file(file_id).unwrap().unwrap();
        assert_eq!(transcript.status, TranscriptStatus::Completed);
        assert_eq!(transcript.raw_text, "full text");
        assert!(transcript.error.is_none());

        let segments = db.get_segments(transcript_id).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].text, "segment 0");
    }

    #[test]
    fn test_resave_replaces_segments_in_place() {
        let (db, _temp, file_id) = setup_db_with_media();

        let first_id = db
            .save_transcription_result(file_id, &result_with_segments(5))
            .unwrap();
        let second_id = db
            .save_transcription_result(file_id, &result_with_segments(2))
            .unwrap();

        // Same transcript row, fully replaced segments
        assert_eq!(first_id, second_id);
        assert_eq!(db.get_segments(second_id).unwrap().len(), 2);
        assert_eq!(db.count_segments(second_id).unwrap(), 2);
    }

    #[test]
    fn test_resave_clears_prior_error() {
        let (db, _temp, file_id) = setup_db_with_media();

        db.mark_transcript_failed(file_id, "provider exploded").unwrap();
        db.save_transcription_result(file_id, &result_with_segments(1))
            .unwrap();

        let transcript = db.get_transcript_for_file(file_id).unwrap().unwrap();
        assert_eq!(transcript.status, TranscriptStatus::Completed);
        assert!(transcript.error.is_none());
    }

    #[test]
    fn test_save_large_batch() {
        let (db, _temp, file_id) = setup_db_with_media();

        // Spans multiple insert batches
        let transcript_id = db
            .save_transcription_result(file_id, &result_with_segments(250))
            .unwrap();

        let segments = db.get_segments(transcript_id).unwrap();
        assert_eq!(segments.len(), 250);
        // Ordered by start time
        assert!(segments.windows(2).all(|w| w[0].start_time <= w[1].start_time));
    }

    #[test]
    fn test_save_empty_segment_list() {
        let (db, _temp, file_id) = setup_db_with_media();

        let transcript_id = db
            .save_transcription_result(file_id, &result_with_segments(0))
            .unwrap();
        assert!(db.get_segments(transcript_id).unwrap().is_empty());
    }

    #[test]
    fn test_save_preserves_word_timestamps() {
        let (db, _temp, file_id) = setup_db_with_media();

        let result = TranscriptionResult {
            raw_text: "hello there".to_string(),
            language: "en".to_string(),
            duration_seconds: Some(2.0),
            segments: vec![NewSegment {
                start_time: 0.0,
                end_time: 2.0,
                text: "hello there".to_string(),
                word_timestamps: Some(vec![
                    WordTimestamp {
                        word: "hello".to_string(),
                        start: 0.0,
                        end: 0.8,
                    },
                    WordTimestamp {
                        word: "there".to_string(),
                        start: 1.0,
                        end: 1.9,
                    },
                ]),
            }],
        };

        let transcript_id = db.save_transcription_result(file_id, &result).unwrap();
        let segments = db.get_segments(transcript_id).unwrap();
        let words = segments[0].word_timestamps.as_ref().unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[1].word, "there");
    }

    #[test]
    fn test_cleanup_partial_removes_incomplete_rows() {
        let (db, _temp, file_id) = setup_db_with_media();

        db.mark_transcript_processing(file_id).unwrap();
        db.cleanup_partial(file_id).unwrap();

        assert!(db.get_transcript_for_file(file_id).unwrap().is_none());
    }

    #[test]
    fn test_cleanup_partial_keeps_completed_transcript() {
        let (db, _temp, file_id) = setup_db_with_media();

        let transcript_id = db
            .save_transcription_result(file_id, &result_with_segments(2))
            .unwrap();
        db.cleanup_partial(file_id).unwrap();

        // A completed transcript is not "half-written"
        assert!(db.get_transcript_for_file(file_id).unwrap().is_some());
        assert_eq!(db.get_segments(transcript_id).unwrap().len(), 2);
    }

    // =========================================================================
    // Status transitions
    // =========================================================================

    #[test]
    fn test_mark_processing_creates_row_on_first_attempt() {
        let (db, _temp, file_id) = setup_db_with_media();

        db.mark_transcript_processing(file_id).unwrap();
        let transcript = db.get_transcript_for_file(file_id).unwrap().unwrap();
        assert_eq!(transcript.status, TranscriptStatus::Processing);
    }

    #[test]
    fn test_mark_failed_records_error_message() {
        let (db, _temp, file_id) = setup_db_with_media();

        db.mark_transcript_failed(file_id, "quota exceeded").unwrap();
        let transcript = db.get_transcript_for_file(file_id).unwrap().unwrap();
        assert_eq!(transcript.status, TranscriptStatus::Failed);
        assert_eq!(transcript.error.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn test_reset_pending_clears_error() {
        let (db, _temp, file_id) = setup_db_with_media();

        db.mark_transcript_failed(file_id, "boom").unwrap();
        db.reset_transcript_pending(file_id).unwrap();

        let transcript = db.get_transcript_for_file(file_id).unwrap().unwrap();
        assert_eq!(transcript.status, TranscriptStatus::Pending);
        assert!(transcript.error.is_none());
    }

    #[test]
    fn test_reset_stuck_processing() {
        let (db, _temp, file_id) = setup_db_with_media();
        let other = db.register_media("/tmp/other.wav", "ja").unwrap();

        db.mark_transcript_processing(file_id).unwrap();
        db.save_transcription_result(other, &result_with_segments(1))
            .unwrap();

        assert_eq!(db.reset_stuck_processing().unwrap(), 1);
        assert_eq!(
            db.get_transcript_for_file(file_id).unwrap().unwrap().status,
            TranscriptStatus::Pending
        );
        // Completed transcripts are untouched
        assert_eq!(
            db.get_transcript_for_file(other).unwrap().unwrap().status,
            TranscriptStatus::Completed
        );
    }
}

#[cfg(test)]
mod enrichment_tests {
    use crate::database::{Database, NewSegment, SegmentUpdate, TranscriptionResult};
    use tempfile::TempDir;

    fn setup_completed_transcript() -> (Database, TempDir, i64) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
        let file_id = db.register_media("/tmp/audio.wav", "ja").unwrap();

        let result = TranscriptionResult {
            raw_text: "a b".to_string(),
            language: "ja".to_string(),
            duration_seconds: Some(4.0),
            segments: vec![
                NewSegment {
                    start_time: 0.0,
                    end_time: 2.0,
                    text: "a".to_string(),
                    word_timestamps: None,
                },
                NewSegment {
                    start_time: 2.0,
                    end_time: 4.0,
                    text: "b".to_string(),
                    word_timestamps: None,
                },
            ],
        };
        let transcript_id = db.save_transcription_result(file_id, &result).unwrap();
        (db, temp_dir, transcript_id)
    }

    fn update(start: f64, end: f64) -> SegmentUpdate {
        SegmentUpdate {
            start_time: start,
            end_time: end,
            normalized_text: Some("normalized".to_string()),
            translation: Some("translated".to_string()),
            annotations: Some(vec!["note".to_string()]),
            phonetic_reading: Some("reading".to_string()),
        }
    }

    #[test]
    fn test_enrichment_matches_by_exact_time_range() {
        let (db, _temp, transcript_id) = setup_completed_transcript();

        let matched = db
            .apply_enrichment(transcript_id, &[update(0.0, 2.0)])
            .unwrap();
        assert_eq!(matched, 1);

        let segments = db.get_segments(transcript_id).unwrap();
        assert_eq!(segments[0].translation.as_deref(), Some("translated"));
        assert_eq!(segments[0].phonetic_reading.as_deref(), Some("reading"));
        assert_eq!(
            segments[0].annotations.as_ref().unwrap(),
            &vec!["note".to_string()]
        );
        // The other segment is untouched
        assert!(segments[1].translation.is_none());
    }

    #[test]
    fn test_enrichment_is_idempotent() {
        let (db, _temp, transcript_id) = setup_completed_transcript();
        let updates = [update(0.0, 2.0), update(2.0, 4.0)];

        db.apply_enrichment(transcript_id, &updates).unwrap();
        let after_first = db.get_segments(transcript_id).unwrap();

        db.apply_enrichment(transcript_id, &updates).unwrap();
        let after_second = db.get_segments(transcript_id).unwrap();

        for (a, b) in after_first.iter().zip(after_second.iter()) {
            assert_eq!(a.normalized_text, b.normalized_text);
            assert_eq!(a.translation, b.translation);
            assert_eq!(a.annotations, b.annotations);
            assert_eq!(a.phonetic_reading, b.phonetic_reading);
        }
    }

    #[test]
    fn test_enrichment_partial_fields_keep_existing_values() {
        let (db, _temp, transcript_id) = setup_completed_transcript();

        db.apply_enrichment(transcript_id, &[update(0.0, 2.0)])
            .unwrap();

        // A later update providing only a translation must not erase the rest
        let partial = SegmentUpdate {
            start_time: 0.0,
            end_time: 2.0,
            normalized_text: None,
            translation: Some("better translation".to_string()),
            annotations: None,
            phonetic_reading: None,
        };
        db.apply_enrichment(transcript_id, &[partial]).unwrap();

        let segments = db.get_segments(transcript_id).unwrap();
        assert_eq!(
            segments[0].translation.as_deref(),
            Some("better translation")
        );
        assert_eq!(segments[0].normalized_text.as_deref(), Some("normalized"));
        assert_eq!(segments[0].phonetic_reading.as_deref(), Some("reading"));
    }

    #[test]
    fn test_enrichment_unmatched_range_counts_zero() {
        let (db, _temp, transcript_id) = setup_completed_transcript();

        let matched = db
            .apply_enrichment(transcript_id, &[update(0.5, 2.5)])
            .unwrap();
        assert_eq!(matched, 0);

        // Nothing inserted or modified
        let segments = db.get_segments(transcript_id).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.translation.is_none()));
    }
}

#[cfg(test)]
mod media_and_settings_tests {
    use crate::database::Database;
    use tempfile::TempDir;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
        (db, temp_dir)
    }

    #[test]
    fn test_register_and_get_media() {
        let (db, _temp) = setup_test_db();

        let id = db.register_media("/data/lesson1.mp3", "ja").unwrap();
        let media = db.get_media_file(id).unwrap().unwrap();
        assert_eq!(media.path, "/data/lesson1.mp3");
        assert_eq!(media.language, "ja");
    }

    #[test]
    fn test_get_missing_media_returns_none() {
        let (db, _temp) = setup_test_db();
        assert!(db.get_media_file(404).unwrap().is_none());
    }

    #[test]
    fn test_default_settings_present() {
        let (db, _temp) = setup_test_db();
        assert_eq!(
            db.get_setting("target_language").unwrap().as_deref(),
            Some("en")
        );
        assert!(db.get_setting("missing_key").unwrap().is_none());
    }

    #[test]
    fn test_set_setting_overwrites() {
        let (db, _temp) = setup_test_db();
        db.set_setting("target_language", "de").unwrap();
        assert_eq!(
            db.get_setting("target_language").unwrap().as_deref(),
            Some("de")
        );
    }

    #[test]
    fn test_stats_counts_by_status() {
        let (db, _temp) = setup_test_db();
        use crate::database::{NewSegment, TranscriptionResult};

        let a = db.register_media("/tmp/a.wav", "en").unwrap();
        let b = db.register_media("/tmp/b.wav", "en").unwrap();
        let result = TranscriptionResult {
            raw_text: "x".to_string(),
            language: "en".to_string(),
            duration_seconds: None,
            segments: vec![NewSegment {
                start_time: 0.0,
                end_time: 1.0,
                text: "x".to_string(),
                word_timestamps: None,
            }],
        };
        db.save_transcription_result(a, &result).unwrap();
        db.mark_transcript_failed(b, "boom").unwrap();

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.completed_transcripts, 1);
        assert_eq!(stats.failed_transcripts, 1);
        assert_eq!(stats.total_segments, 1);
    }
}
