//! Integration tests for the order, deposit, inventory and waste commands
//! These tests use an in-memory SQLite database behind a full AppContext

#[cfg(test)]
mod tests {
    use rusqlite::types::Value;
    use rust_decimal::Decimal;

    use crate::commands::deposits::{add_deposit, get_deposit_history, set_deposit};
    use crate::commands::inventory::{analyze_inventory, confirm_inventory};
    use crate::commands::invoice::{build_invoice, generate_invoice, DocumentRenderer, InvoiceDocument};
    use crate::commands::orders::{
        create_order, get_order, list_orders, replace_order_lines, set_status, update_order,
    };
    use crate::commands::waste::list_waste;
    use crate::models::{
        CreateOrder, MeasurementUnit, OrderLineInput, OrderStatus, UpdateOrder, WasteDecision,
        WasteFilter, WasteStatus,
    };
    use crate::{AppConfig, AppContext, AppError, Database};

    const GRANITE: i64 = 1; // sold by m², 0.25 m² per piece, 20 pieces
    const SLAB: i64 = 2; // sold by piece, 1 m² per piece, 10 pieces, $100
    const TILE: i64 = 3; // sold by piece, no area per piece
    const MARBLE: i64 = 4; // sold by m², 2 m² per piece, 1 piece

    /// Create a context over a fresh in-memory database with schema
    fn setup_test_db() -> AppContext {
        let db = Database::open_in_memory().expect("Failed to create in-memory database");
        db.initialize().expect("Failed to create schema");
        AppContext::new(db, AppConfig::default())
    }

    /// Seed catalog data
    fn seed_test_data(ctx: &AppContext) {
        let conn = ctx.db().conn.lock().unwrap();
        conn.execute_batch(
            "
            INSERT INTO clients (name, phone, rfc, address)
                VALUES ('Constructora Norte', '555-0101', 'CNO010101AAA', 'Av. Juárez 12');
            INSERT INTO users (name, email) VALUES ('Ana', 'ana@example.com');
            INSERT INTO users (name, email) VALUES ('Luis', 'luis@example.com');

            INSERT INTO products (name, price, area_per_piece, stock_pieces, stock_area)
                VALUES ('Granito Gris', '400', '0.25', 20, '5');
            INSERT INTO products (name, price, area_per_piece, stock_pieces, stock_area)
                VALUES ('Losa Travertino', '100', '1', 10, NULL);
            INSERT INTO products (name, price, area_per_piece, stock_pieces, stock_area)
                VALUES ('Azulejo Cuarzo', '50', NULL, 5, NULL);
            INSERT INTO products (name, price, area_per_piece, stock_pieces, stock_area)
                VALUES ('Mármol Negro', '900', '2', 1, '2');
            ",
        )
        .unwrap();
    }

    fn setup() -> AppContext {
        let ctx = setup_test_db();
        seed_test_data(&ctx);
        ctx
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn line(product_id: i64, quantity: f64, unit: MeasurementUnit) -> OrderLineInput {
        OrderLineInput {
            product_id,
            quantity,
            unit,
            description: None,
        }
    }

    fn new_order(lines: Vec<OrderLineInput>, include_tax: bool, deposit: Option<f64>) -> CreateOrder {
        CreateOrder {
            title: "Cocina integral".to_string(),
            client_id: 1,
            user_id: 1,
            lines,
            include_tax,
            deposit,
        }
    }

    /// $1000 order: ten slabs, no tax
    fn thousand_order(ctx: &AppContext, deposit: Option<f64>) -> i64 {
        create_order(
            ctx,
            new_order(vec![line(SLAB, 10.0, MeasurementUnit::Piezas)], false, deposit),
        )
        .unwrap()
        .order
        .id
    }

    fn stock(ctx: &AppContext, product_id: i64) -> i64 {
        let conn = ctx.db().conn.lock().unwrap();
        conn.query_row(
            "SELECT stock_pieces FROM products WHERE id = ?1",
            [product_id],
            |row| row.get(0),
        )
        .unwrap()
    }

    fn waste_count(ctx: &AppContext) -> i64 {
        let conn = ctx.db().conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM waste_records", [], |row| row.get(0))
            .unwrap()
    }

    fn waste_row(ctx: &AppContext, waste_id: i64) -> Vec<Value> {
        let conn = ctx.db().conn.lock().unwrap();
        conn.query_row("SELECT * FROM waste_records WHERE id = ?1", [waste_id], |row| {
            (0..row.as_ref().column_count())
                .map(|i| row.get::<_, Value>(i))
                .collect()
        })
        .unwrap()
    }

    /// Make every offcut insert fail from now on
    fn block_waste_inserts(ctx: &AppContext) {
        let conn = ctx.db().conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER block_waste BEFORE INSERT ON waste_records
             BEGIN SELECT RAISE(ABORT, 'offcut storage unavailable'); END;",
        )
        .unwrap();
    }

    fn keep(product_id: i64) -> WasteDecision {
        WasteDecision {
            product_id,
            keep_waste: true,
            notes: Some("para lavabo".to_string()),
        }
    }

    // ===== ORDER CREATION TESTS =====

    #[test]
    fn test_create_order_computes_totals() {
        let ctx = setup();

        let created = create_order(
            &ctx,
            new_order(vec![line(GRANITE, 2.3, MeasurementUnit::M2)], true, None),
        )
        .unwrap();

        assert_eq!(created.order.subtotal, dec("920"));
        assert_eq!(created.order.tax, dec("147.20"));
        assert_eq!(created.order.total, dec("1067.20"));
        assert_eq!(created.order.status, OrderStatus::Pendiente);
        assert_eq!(created.order.deposit, Decimal::ZERO);
        assert_eq!(created.order.client_name.as_deref(), Some("Constructora Norte"));

        assert_eq!(created.lines.len(), 1);
        assert_eq!(created.lines[0].area_m2, dec("2.3"));
        assert_eq!(created.lines[0].pieces_equivalent, Some(10));
        assert_eq!(created.lines[0].product_name.as_deref(), Some("Granito Gris"));
    }

    #[test]
    fn test_create_order_does_not_touch_stock() {
        let ctx = setup();

        thousand_order(&ctx, None);
        create_order(
            &ctx,
            new_order(vec![line(GRANITE, 2.3, MeasurementUnit::M2)], false, None),
        )
        .unwrap();

        assert_eq!(stock(&ctx, SLAB), 10);
        assert_eq!(stock(&ctx, GRANITE), 20);
    }

    #[test]
    fn test_create_order_rejects_unit_mismatch() {
        let ctx = setup();

        let err = create_order(
            &ctx,
            new_order(vec![line(GRANITE, 3.0, MeasurementUnit::Piezas)], false, None),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = create_order(
            &ctx,
            new_order(vec![line(SLAB, 3.0, MeasurementUnit::M2)], false, None),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_create_order_rejects_bad_quantities() {
        let ctx = setup();

        for quantity in [0.0, -2.0, 1.5, f64::NAN] {
            let err = create_order(
                &ctx,
                new_order(vec![line(SLAB, quantity, MeasurementUnit::Piezas)], false, None),
            )
            .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "quantity {}", quantity);
        }
    }

    #[test]
    fn test_create_order_requires_title_and_lines() {
        let ctx = setup();

        let mut order = new_order(vec![line(SLAB, 1.0, MeasurementUnit::Piezas)], false, None);
        order.title = "   ".to_string();
        assert!(matches!(create_order(&ctx, order), Err(AppError::Validation(_))));

        let order = new_order(vec![], false, None);
        assert!(matches!(create_order(&ctx, order), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_create_order_unknown_references() {
        let ctx = setup();

        let err = create_order(
            &ctx,
            new_order(vec![line(99, 1.0, MeasurementUnit::Piezas)], false, None),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let mut order = new_order(vec![line(SLAB, 1.0, MeasurementUnit::Piezas)], false, None);
        order.client_id = 42;
        assert!(matches!(create_order(&ctx, order), Err(AppError::NotFound(_))));

        assert!(list_orders(&ctx).unwrap().is_empty());
    }

    #[test]
    fn test_create_order_deposit_limits() {
        let ctx = setup();

        let err = create_order(
            &ctx,
            new_order(vec![line(SLAB, 10.0, MeasurementUnit::Piezas)], false, Some(1000.01)),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::OverLimit { .. }));

        let paid = thousand_order(&ctx, Some(1000.0));
        assert_eq!(get_order(&ctx, paid).unwrap().order.status, OrderStatus::Pagado);
    }

    #[test]
    fn test_huge_quantity_is_rejected_and_db_stays_usable() {
        let ctx = setup();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            create_order(
                &ctx,
                new_order(vec![line(GRANITE, 1e27, MeasurementUnit::M2)], false, None),
            )
        }));
        let result = result.expect("create_order must not panic");
        assert!(matches!(result, Err(AppError::Validation(_))));

        // The connection lock is still healthy
        let order_id = thousand_order(&ctx, None);
        assert_eq!(get_order(&ctx, order_id).unwrap().order.total, dec("1000"));
    }

    // ===== DEPOSIT TESTS =====

    #[test]
    fn test_deposit_gate_blocks_analysis_until_seventy_percent() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, Some(650.0));

        match analyze_inventory(&ctx, order_id) {
            Err(AppError::InsufficientDeposit {
                current_percent,
                required_percent,
            }) => {
                assert_eq!(current_percent, dec("65"));
                assert_eq!(required_percent, dec("70"));
            }
            other => panic!("expected insufficient deposit, got {:?}", other),
        }

        add_deposit(&ctx, order_id, 50.0, 1, None).unwrap();

        let analysis = analyze_inventory(&ctx, order_id).unwrap();
        assert_eq!(analysis.deposit_percent, dec("70"));
        assert!(analysis.can_confirm);
    }

    #[test]
    fn test_add_deposit_records_ledger() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, None);

        let receipt = add_deposit(&ctx, order_id, 300.0, 2, Some("  transferencia ".into())).unwrap();
        assert_eq!(receipt.order.deposit, dec("300"));
        assert_eq!(receipt.pending_balance, dec("700"));
        assert_eq!(receipt.entry.amount, dec("300"));
        assert_eq!(receipt.entry.user_name.as_deref(), Some("Luis"));
        assert_eq!(receipt.entry.notes.as_deref(), Some("transferencia"));
        assert!(receipt.order.last_deposit_at.is_some());
        assert_eq!(receipt.order.status, OrderStatus::Pendiente);

        let receipt = add_deposit(&ctx, order_id, 700.0, 1, None).unwrap();
        assert_eq!(receipt.order.status, OrderStatus::Pagado);
        assert_eq!(receipt.pending_balance, Decimal::ZERO);
        assert_eq!(receipt.history.len(), 2);
    }

    #[test]
    fn test_ledger_sum_matches_deposit() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, None);

        for amount in [120.5, 79.5, 250.0] {
            add_deposit(&ctx, order_id, amount, 1, None).unwrap();
        }

        let history = get_deposit_history(&ctx, order_id).unwrap();
        let sum: Decimal = history.entries.iter().map(|e| e.amount).sum();
        assert_eq!(sum, history.deposit_total);
        assert_eq!(history.deposit_total, dec("450"));
        assert_eq!(history.pending_balance, dec("550"));
        assert_eq!(history.entries.len(), 3);
        // Newest first
        assert_eq!(history.entries[0].amount, dec("250"));
    }

    #[test]
    fn test_add_deposit_over_limit_changes_nothing() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, Some(900.0));

        let err = add_deposit(&ctx, order_id, 150.0, 1, None).unwrap_err();
        match err {
            AppError::OverLimit { attempted, total } => {
                assert_eq!(attempted, dec("1050"));
                assert_eq!(total, dec("1000"));
            }
            other => panic!("expected over limit, got {:?}", other),
        }

        let history = get_deposit_history(&ctx, order_id).unwrap();
        assert_eq!(history.deposit_total, dec("900"));
        assert!(history.entries.is_empty());
    }

    #[test]
    fn test_add_deposit_rejects_invalid_amounts() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, None);

        for amount in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let err = add_deposit(&ctx, order_id, amount, 1, None).unwrap_err();
            assert!(matches!(err, AppError::InvalidAmount(_)), "amount {}", amount);
        }

        assert!(matches!(
            add_deposit(&ctx, 999, 10.0, 1, None),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            add_deposit(&ctx, order_id, 10.0, 77, None),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_sub_cent_deposit_leaves_no_ledger_entry() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, None);

        assert!(matches!(
            add_deposit(&ctx, order_id, 0.004, 1, None),
            Err(AppError::InvalidAmount(_))
        ));

        let history = get_deposit_history(&ctx, order_id).unwrap();
        assert!(history.entries.is_empty());
        assert_eq!(history.deposit_total, Decimal::ZERO);
    }

    #[test]
    fn test_set_deposit_marks_paid_without_ledger() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(SLAB, 5.0, MeasurementUnit::Piezas)], false, None),
        )
        .unwrap()
        .order
        .id;

        let order = set_deposit(&ctx, order_id, 500.0).unwrap();
        assert_eq!(order.deposit, dec("500"));
        assert_eq!(order.status, OrderStatus::Pagado);

        assert!(get_deposit_history(&ctx, order_id).unwrap().entries.is_empty());
        assert!(matches!(
            set_deposit(&ctx, order_id, 500.5),
            Err(AppError::OverLimit { .. })
        ));
        assert!(matches!(
            set_deposit(&ctx, order_id, -1.0),
            Err(AppError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_list_orders_carries_deposit_metadata() {
        let ctx = setup();
        let first = thousand_order(&ctx, None);
        let second = thousand_order(&ctx, None);

        add_deposit(&ctx, first, 100.0, 1, None).unwrap();
        add_deposit(&ctx, first, 40.0, 1, None).unwrap();

        let orders = list_orders(&ctx).unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].order.id, second);
        assert_eq!(orders[0].deposit_count, 0);
        assert!(orders[0].last_deposit_amount.is_none());

        assert_eq!(orders[1].order.id, first);
        assert_eq!(orders[1].deposit_count, 2);
        assert_eq!(orders[1].last_deposit_amount, Some(dec("40")));
        assert!(orders[1].last_deposit_at.is_some());
    }

    // ===== ORDER EDIT TESTS =====

    #[test]
    fn test_reducing_pieces_returns_stock() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(SLAB, 3.0, MeasurementUnit::Piezas)], false, None),
        )
        .unwrap()
        .order
        .id;
        let waste_before = waste_count(&ctx);

        let update =
            replace_order_lines(&ctx, order_id, vec![line(SLAB, 1.0, MeasurementUnit::Piezas)])
                .unwrap();

        assert!(update.inventory_adjusted);
        assert!(!update.insufficient_stock);
        assert_eq!(update.adjustments.len(), 1);
        assert_eq!(update.adjustments[0].delta_pieces, -2);
        assert_eq!(update.adjustments[0].waste_record_id, None);
        assert_eq!(stock(&ctx, SLAB), 12);
        assert_eq!(waste_count(&ctx), waste_before);

        assert_eq!(update.order.lines.len(), 1);
        assert_eq!(update.order.order.total, dec("100"));
    }

    #[test]
    fn test_shrinking_leaves_recorded_offcuts_untouched() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(GRANITE, 2.0, MeasurementUnit::M2)], false, None),
        )
        .unwrap()
        .order
        .id;
        let grown =
            replace_order_lines(&ctx, order_id, vec![line(GRANITE, 2.1, MeasurementUnit::M2)])
                .unwrap();
        let waste_id = grown.adjustments[0].waste_record_id.unwrap();
        let before = waste_row(&ctx, waste_id);

        let shrunk =
            replace_order_lines(&ctx, order_id, vec![line(GRANITE, 1.0, MeasurementUnit::M2)])
                .unwrap();

        assert_eq!(shrunk.adjustments[0].delta_pieces, -5);
        assert_eq!(shrunk.adjustments[0].waste_record_id, None);
        assert_eq!(stock(&ctx, GRANITE), 24);
        assert_eq!(waste_count(&ctx), 1);
        assert_eq!(waste_row(&ctx, waste_id), before);
    }

    #[test]
    fn test_growing_area_takes_pieces_and_records_offcut() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(GRANITE, 2.0, MeasurementUnit::M2)], false, None),
        )
        .unwrap()
        .order
        .id;

        let update = update_order(
            &ctx,
            order_id,
            UpdateOrder {
                lines: Some(vec![line(GRANITE, 2.1, MeasurementUnit::M2)]),
                edited_by: Some(2),
                ..Default::default()
            },
        )
        .unwrap();

        let adjustment = &update.adjustments[0];
        assert_eq!(adjustment.pieces_before, 8);
        assert_eq!(adjustment.pieces_after, 9);
        assert_eq!(adjustment.delta_pieces, 1);
        assert_eq!(stock(&ctx, GRANITE), 19);
        assert!(adjustment.waste_record_id.is_some());

        let listing = list_waste(&ctx, WasteFilter::default()).unwrap();
        assert_eq!(listing.total_records, 1);
        let record = &listing.records[0];
        assert_eq!(record.area_wasted, dec("0.15"));
        assert_eq!(record.waste_percent, dec("60"));
        assert_eq!(record.notes.as_deref(), Some("Ajuste por edición de orden"));
        assert_eq!(record.user_id, Some(2));
        assert_eq!(update.order.order.subtotal, dec("840"));
    }

    #[test]
    fn test_unchanged_piece_count_moves_nothing() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(GRANITE, 2.3, MeasurementUnit::M2)], false, None),
        )
        .unwrap()
        .order
        .id;

        let update =
            replace_order_lines(&ctx, order_id, vec![line(GRANITE, 2.4, MeasurementUnit::M2)])
                .unwrap();

        assert!(!update.inventory_adjusted);
        assert!(update.adjustments.is_empty());
        assert_eq!(stock(&ctx, GRANITE), 20);
    }

    #[test]
    fn test_edit_can_leave_stock_negative() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(MARBLE, 2.0, MeasurementUnit::M2)], false, None),
        )
        .unwrap()
        .order
        .id;

        let update =
            replace_order_lines(&ctx, order_id, vec![line(MARBLE, 6.0, MeasurementUnit::M2)])
                .unwrap();

        assert!(update.insufficient_stock);
        let deficits = update.products_with_deficit();
        assert_eq!(deficits.len(), 1);
        assert_eq!(deficits[0].stock_before, 1);
        assert_eq!(deficits[0].stock_after, -1);
        assert_eq!(deficits[0].deficit, 1);
        assert_eq!(stock(&ctx, MARBLE), -1);
    }

    #[test]
    fn test_edit_requires_pending_status() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, None);
        set_status(&ctx, order_id, "en_proceso").unwrap();

        let err = replace_order_lines(&ctx, order_id, vec![line(SLAB, 1.0, MeasurementUnit::Piezas)])
            .unwrap_err();
        assert!(matches!(err, AppError::StateConflict(_)));
        assert_eq!(stock(&ctx, SLAB), 10);

        // Header edits are still allowed
        let update = update_order(
            &ctx,
            order_id,
            UpdateOrder {
                title: Some("Baño principal".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(update.order.order.title, "Baño principal");
        assert_eq!(update.order.order.status, OrderStatus::EnProceso);
    }

    #[test]
    fn test_edit_below_deposit_is_rejected() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, Some(800.0));

        let err = replace_order_lines(&ctx, order_id, vec![line(SLAB, 5.0, MeasurementUnit::Piezas)])
            .unwrap_err();
        assert!(matches!(err, AppError::OverLimit { .. }));

        let order = get_order(&ctx, order_id).unwrap();
        assert_eq!(order.order.total, dec("1000"));
        assert_eq!(order.lines[0].quantity, dec("10"));
        assert_eq!(stock(&ctx, SLAB), 10);

        // Lowering the deposit in the same edit makes it fit
        let update = update_order(
            &ctx,
            order_id,
            UpdateOrder {
                lines: Some(vec![line(SLAB, 5.0, MeasurementUnit::Piezas)]),
                deposit: Some(500.0),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(update.order.order.total, dec("500"));
        assert_eq!(update.order.order.status, OrderStatus::Pagado);
    }

    #[test]
    fn test_update_order_toggles_tax() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, None);

        let update = update_order(
            &ctx,
            order_id,
            UpdateOrder {
                include_tax: Some(true),
                title: Some("  ".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(update.order.order.title, "Cocina integral");
        assert_eq!(update.order.order.tax, dec("160"));
        assert_eq!(update.order.order.total, dec("1160"));
        assert!(!update.inventory_adjusted);
    }

    #[test]
    fn test_update_order_explicit_status_wins_over_deposit() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, None);

        let update = update_order(
            &ctx,
            order_id,
            UpdateOrder {
                deposit: Some(1000.0),
                status: Some("fabricado".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(update.order.order.deposit, dec("1000"));
        assert_eq!(update.order.order.status, OrderStatus::Fabricado);
    }

    #[test]
    fn test_set_status_validates_value() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, None);

        assert!(matches!(
            set_status(&ctx, order_id, "archivado"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            set_status(&ctx, 999, "pagado"),
            Err(AppError::NotFound(_))
        ));

        let order = set_status(&ctx, order_id, "espera_material").unwrap();
        assert_eq!(order.order.status, OrderStatus::EsperaMaterial);
    }

    // ===== INVENTORY TESTS =====

    #[test]
    fn test_analyze_slab_scenario() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(GRANITE, 2.3, MeasurementUnit::M2)], false, Some(920.0)),
        )
        .unwrap()
        .order
        .id;

        let analysis = analyze_inventory(&ctx, order_id).unwrap();
        let l = &analysis.lines[0];
        assert_eq!(l.pieces_exact, dec("9.2"));
        assert_eq!(l.pieces_needed, 10);
        assert_eq!(l.area_used, dec("2.5"));
        assert_eq!(l.waste_area, dec("0.2"));
        assert_eq!(l.waste_percent, dec("80"));
        assert!(!l.small_waste);
        assert_eq!(l.pieces_left_after, 10);
        assert!(l.suggestion.contains("guardar"));

        // Analysis writes nothing
        assert_eq!(stock(&ctx, GRANITE), 20);
        assert_eq!(waste_count(&ctx), 0);
    }

    #[test]
    fn test_analyze_rounds_fractional_piece_count() {
        let ctx = setup();
        {
            let conn = ctx.db().conn.lock().unwrap();
            conn.execute(
                "INSERT INTO products (name, price, area_per_piece, stock_pieces)
                 VALUES ('Cantera Rosa', '100', '0.3', 10)",
                [],
            )
            .unwrap();
        }
        let order_id = create_order(
            &ctx,
            new_order(vec![line(5, 1.0, MeasurementUnit::M2)], false, Some(100.0)),
        )
        .unwrap()
        .order
        .id;

        let analysis = analyze_inventory(&ctx, order_id).unwrap();
        assert_eq!(analysis.lines[0].pieces_exact, dec("3.33"));
        assert_eq!(analysis.lines[0].pieces_needed, 4);
    }

    #[test]
    fn test_analyze_flags_small_offcut() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(GRANITE, 0.97, MeasurementUnit::M2)], false, Some(388.0)),
        )
        .unwrap()
        .order
        .id;

        let analysis = analyze_inventory(&ctx, order_id).unwrap();
        assert_eq!(analysis.lines[0].waste_percent, dec("12"));
        assert!(analysis.lines[0].small_waste);
        assert!(analysis.lines[0].suggestion.contains("descartar"));
    }

    #[test]
    fn test_analyze_reports_missing_stock() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(MARBLE, 6.0, MeasurementUnit::M2)], false, Some(5400.0)),
        )
        .unwrap()
        .order
        .id;

        let analysis = analyze_inventory(&ctx, order_id).unwrap();
        assert!(!analysis.can_confirm);
        assert_eq!(analysis.stock_errors.len(), 1);
        assert!(analysis.stock_errors[0].starts_with("Mármol Negro"));
        assert_eq!(analysis.lines[0].pieces_left_after, -2);
    }

    #[test]
    fn test_analyze_rejects_product_without_area_per_piece() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(TILE, 2.0, MeasurementUnit::Piezas)], false, Some(100.0)),
        )
        .unwrap()
        .order
        .id;

        assert!(matches!(
            analyze_inventory(&ctx, order_id),
            Err(AppError::InvalidProductConfig(_))
        ));
    }

    #[test]
    fn test_confirm_requires_a_decision_per_line() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(
                vec![
                    line(GRANITE, 2.3, MeasurementUnit::M2),
                    line(SLAB, 2.0, MeasurementUnit::Piezas),
                ],
                false,
                Some(1120.0),
            ),
        )
        .unwrap()
        .order
        .id;

        match confirm_inventory(&ctx, order_id, vec![keep(GRANITE)], 1) {
            Err(AppError::MissingConfirmation { product_id, .. }) => assert_eq!(product_id, SLAB),
            other => panic!("expected missing confirmation, got {:?}", other),
        }
        assert_eq!(stock(&ctx, GRANITE), 20);
        assert_eq!(stock(&ctx, SLAB), 10);

        assert!(matches!(
            confirm_inventory(&ctx, order_id, vec![], 1),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_confirm_takes_stock_and_keeps_offcut() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(GRANITE, 2.3, MeasurementUnit::M2)], false, Some(920.0)),
        )
        .unwrap()
        .order
        .id;

        let confirmation = confirm_inventory(&ctx, order_id, vec![keep(GRANITE)], 1).unwrap();
        assert_eq!(confirmation.lines[0].stock_before, 20);
        assert_eq!(confirmation.lines[0].stock_after, 10);
        assert!(confirmation.lines[0].waste_kept);
        assert_eq!(confirmation.kept_waste.len(), 1);
        assert_eq!(confirmation.kept_waste[0].area_wasted, dec("0.2"));
        assert_eq!(confirmation.kept_waste[0].status, WasteStatus::Disponible);
        assert_eq!(stock(&ctx, GRANITE), 10);

        // Not idempotent: a second confirmation takes the pieces again
        let again = confirm_inventory(&ctx, order_id, vec![keep(GRANITE)], 1).unwrap();
        assert_eq!(again.lines[0].stock_after, 0);
        assert_eq!(stock(&ctx, GRANITE), 0);
        assert_eq!(waste_count(&ctx), 2);
    }

    #[test]
    fn test_confirm_discarded_offcut_is_not_recorded() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(GRANITE, 2.3, MeasurementUnit::M2)], false, Some(920.0)),
        )
        .unwrap()
        .order
        .id;

        let decision = WasteDecision {
            product_id: GRANITE,
            keep_waste: false,
            notes: None,
        };
        let confirmation = confirm_inventory(&ctx, order_id, vec![decision], 1).unwrap();
        assert!(confirmation.kept_waste.is_empty());
        assert!(!confirmation.lines[0].waste_kept);
        assert_eq!(waste_count(&ctx), 0);
        assert_eq!(stock(&ctx, GRANITE), 10);
    }

    #[test]
    fn test_failed_offcut_insert_keeps_stock_change() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(GRANITE, 2.3, MeasurementUnit::M2)], false, Some(920.0)),
        )
        .unwrap()
        .order
        .id;
        block_waste_inserts(&ctx);

        let confirmation = confirm_inventory(&ctx, order_id, vec![keep(GRANITE)], 1).unwrap();
        assert!(!confirmation.lines[0].waste_kept);
        assert!(confirmation.kept_waste.is_empty());
        assert_eq!(confirmation.lines[0].stock_after, 10);
        assert_eq!(stock(&ctx, GRANITE), 10);
        assert_eq!(waste_count(&ctx), 0);
    }

    #[test]
    fn test_failed_offcut_insert_during_edit_keeps_stock_change() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(GRANITE, 2.0, MeasurementUnit::M2)], false, None),
        )
        .unwrap()
        .order
        .id;
        block_waste_inserts(&ctx);

        let update =
            replace_order_lines(&ctx, order_id, vec![line(GRANITE, 2.1, MeasurementUnit::M2)])
                .unwrap();
        assert_eq!(update.adjustments[0].delta_pieces, 1);
        assert_eq!(update.adjustments[0].waste_record_id, None);
        assert_eq!(stock(&ctx, GRANITE), 19);
        assert_eq!(update.order.lines[0].area_m2, dec("2.1"));
        assert_eq!(waste_count(&ctx), 0);
    }

    #[test]
    fn test_confirm_with_insufficient_stock_goes_negative() {
        let ctx = setup();
        let order_id = create_order(
            &ctx,
            new_order(vec![line(MARBLE, 6.0, MeasurementUnit::M2)], false, Some(5400.0)),
        )
        .unwrap()
        .order
        .id;

        let confirmation = confirm_inventory(&ctx, order_id, vec![keep(MARBLE)], 1).unwrap();
        assert!(confirmation.insufficient_stock);
        let short = confirmation.lines_with_deficit();
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].deficit, 2);
        assert_eq!(stock(&ctx, MARBLE), -2);
        // 3 pieces of 2 m² cover 6 m² exactly
        assert!(confirmation.kept_waste.is_empty());
    }

    #[test]
    fn test_confirm_checks_gate_and_user() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, Some(100.0));

        assert!(matches!(
            confirm_inventory(&ctx, order_id, vec![keep(SLAB)], 1),
            Err(AppError::InsufficientDeposit { .. })
        ));
        assert!(matches!(
            confirm_inventory(&ctx, order_id, vec![keep(SLAB)], 55),
            Err(AppError::NotFound(_))
        ));
        assert_eq!(stock(&ctx, SLAB), 10);
    }

    // ===== WASTE LISTING TESTS =====

    #[test]
    fn test_list_waste_groups_and_filters() {
        let ctx = setup();
        let granite_order = create_order(
            &ctx,
            new_order(vec![line(GRANITE, 2.3, MeasurementUnit::M2)], false, Some(920.0)),
        )
        .unwrap()
        .order
        .id;
        confirm_inventory(&ctx, granite_order, vec![keep(GRANITE)], 1).unwrap();
        confirm_inventory(&ctx, granite_order, vec![keep(GRANITE)], 1).unwrap();

        let marble_order = create_order(
            &ctx,
            new_order(vec![line(MARBLE, 1.5, MeasurementUnit::M2)], false, Some(1350.0)),
        )
        .unwrap()
        .order
        .id;
        confirm_inventory(&ctx, marble_order, vec![keep(MARBLE)], 1).unwrap();

        {
            let conn = ctx.db().conn.lock().unwrap();
            conn.execute(
                "UPDATE waste_records SET status = 'utilizado' WHERE id = (SELECT MIN(id) FROM waste_records)",
                [],
            )
            .unwrap();
        }

        let listing = list_waste(&ctx, WasteFilter::default()).unwrap();
        assert_eq!(listing.total_records, 2);
        assert_eq!(listing.total_area, dec("0.7"));
        assert_eq!(listing.by_product.len(), 2);
        assert_eq!(listing.by_product[0].product_id, GRANITE);
        assert_eq!(listing.by_product[0].total_area, dec("0.2"));
        assert_eq!(listing.by_product[1].product_name, "Mármol Negro");
        assert_eq!(listing.by_product[1].total_area, dec("0.5"));

        let used = list_waste(
            &ctx,
            WasteFilter {
                product_id: None,
                status: Some(WasteStatus::Utilizado),
            },
        )
        .unwrap();
        assert_eq!(used.total_records, 1);

        let marble_only = list_waste(
            &ctx,
            WasteFilter {
                product_id: Some(MARBLE),
                status: None,
            },
        )
        .unwrap();
        assert_eq!(marble_only.total_records, 1);
        assert_eq!(marble_only.records[0].waste_percent, dec("25"));
    }

    // ===== INVOICE TESTS =====

    struct JsonRenderer;

    impl DocumentRenderer for JsonRenderer {
        fn render(
            &self,
            invoice: &InvoiceDocument,
        ) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(serde_json::to_vec(invoice)?)
        }
    }

    struct BrokenRenderer;

    impl DocumentRenderer for BrokenRenderer {
        fn render(
            &self,
            _invoice: &InvoiceDocument,
        ) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
            Err("printer on fire".into())
        }
    }

    #[test]
    fn test_invoice_payload_is_fully_resolved() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, Some(400.0));

        let invoice = build_invoice(&ctx, order_id).unwrap();
        assert_eq!(invoice.client.rfc.as_deref(), Some("CNO010101AAA"));
        assert_eq!(invoice.user.name, "Ana");
        assert_eq!(invoice.lines.len(), 1);
        assert_eq!(invoice.balance, dec("600"));

        let bytes = generate_invoice(&ctx, order_id, &JsonRenderer).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["client"]["name"], "Constructora Norte");
        assert_eq!(json["lines"][0]["product_name"], "Losa Travertino");
    }

    #[test]
    fn test_invoice_failures() {
        let ctx = setup();
        let order_id = thousand_order(&ctx, None);

        assert!(matches!(
            generate_invoice(&ctx, order_id, &BrokenRenderer),
            Err(AppError::Internal(_))
        ));
        assert!(matches!(build_invoice(&ctx, 404), Err(AppError::NotFound(_))));

        {
            let conn = ctx.db().conn.lock().unwrap();
            conn.execute("DELETE FROM order_lines WHERE order_id = ?1", [order_id])
                .unwrap();
        }
        assert!(matches!(
            build_invoice(&ctx, order_id),
            Err(AppError::Validation(_))
        ));
    }
}
