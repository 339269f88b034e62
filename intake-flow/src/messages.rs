//! Texts sent to clients and advisors.

use crate::{
    case::{Case, CaseData, Flow, Role, Slot},
    derive::Tier,
};

pub const MENU: &str = "👋 ¡Hola! Soy el asistente de *KiosKeys*. ¿Qué necesitás?\n\
1) Duplicado de llave\n\
2) Cambio de carcasa\n\
3) Llave nueva\n\n\
Respondé con el número de la opción. Escribí *0* para volver a este menú.";

pub const PRICE_INFO: &str = "💰 Los precios dependen del tipo de llave o servicio. \
Un asesor puede confirmarte el valor exacto, ya le avisé.";

pub const LOCATION_INFO: &str =
    "📍 Estamos en Av. Hipólito Yrigoyen 114, Morón. Horario de atención: 9 a 13 y 14 a 17 hs.";

pub const HANDOFF_ACK: &str = "🙋 Ya avisé a un asesor, te va a escribir a la brevedad.";

pub const LOCATION_SAVED: &str = "📍 ¡Gracias! Registré tu ubicación.";

/// Question asked to fill `slot`
pub fn prompt(slot: Slot) -> &'static str {
    match slot {
        Slot::Role => "¿Es *1) Asegurado* o *2) Particular*? Respondé 1 o 2.",
        Slot::Insurer => {
            "¿Con qué *aseguradora*? (ej: La Segunda, Sancor, Mapfre). Si no está en la lista respondé *otra*."
        }
        Slot::Make => "Indicame la *marca* del vehículo.",
        Slot::Model => "¿Cuál es el *modelo*?",
        Slot::Year => "¿En qué *año* fue fabricado? (ej: 2019)",
        Slot::Plate => "Por último, indicame la *patente* (ej: ABC123 o AA123BB).",
        Slot::PostalCode => "¿Cuál es tu *código postal*? (4 dígitos, ej: 1708)",
    }
}

/// Re-prompt after an answer was rejected
pub fn retry(slot: Slot) -> String {
    match slot {
        Slot::Role => "Por favor respondé con *1 (Asegurado)* o *2 (Particular)*.".to_string(),
        Slot::Insurer => {
            "No reconozco esa aseguradora. Escribí su nombre (ej: Sancor, La Segunda) o respondé *otra*."
                .to_string()
        }
        Slot::Year => "El *año* no parece válido. Por ejemplo: *2019*.".to_string(),
        Slot::Plate => {
            "La *patente* no parece válida. Usá el formato ABC123 o AA123BB.".to_string()
        }
        Slot::PostalCode => "El *código postal* debe tener 4 dígitos, ej: *1708*.".to_string(),
        Slot::Make | Slot::Model => format!("No te entendí. {}", prompt(slot)),
    }
}

/// Reply after `answered` was accepted and `next` is asked for
pub fn accepted(answered: Slot, role: Option<Role>, next: &str) -> String {
    let ack = match (answered, role) {
        (Slot::Role, Some(Role::Private)) => "Entendido.",
        (Slot::Role, _) | (Slot::Model, _) => "Perfecto.",
        (Slot::Insurer, _) => "Anotado.",
        _ => "Gracias.",
    };
    format!("{ack} {next}")
}

/// Reply when a flow is picked from the menu
pub fn flow_selected(next: &str, first_slot: Option<Slot>) -> String {
    match first_slot {
        Some(Slot::Role) => next.to_string(),
        _ => format!("Perfecto. {next}"),
    }
}

pub fn slot_label(slot: Slot) -> &'static str {
    match slot {
        Slot::Role => "Rol",
        Slot::Insurer => "Aseguradora",
        Slot::Make => "Marca",
        Slot::Model => "Modelo",
        Slot::Year => "Año",
        Slot::Plate => "Patente",
        Slot::PostalCode => "Código postal",
    }
}

/// Summary and confirmation question for a complete case
pub fn confirm(flow: Flow, case: &CaseData) -> String {
    let mut text = format!("📋 Revisá los datos:\nGestión: {}\n", flow.label());
    if let Some(role) = case.role {
        text.push_str(&format!("Rol: {}\n", role.label()));
    }
    if let Some(insurer) = &case.insurer {
        text.push_str(&format!("Aseguradora: {}\n", insurer.as_str()));
    }
    text.push_str(&format!("Vehículo: {}\n", case.vehicle()));
    if let Some(plate) = &case.plate {
        text.push_str(&format!("Patente: {plate}\n"));
    }
    if let Some(postal_code) = &case.postal_code {
        text.push_str(&format!("Código postal: {postal_code}\n"));
    }
    text.push_str("\n¿Está todo bien?\n1) Confirmar\n2) Corregir un dato");
    if case.postal_code.is_none() {
        text.push_str(
            "\n\nSi querés, enviá tu *código postal* (4 dígitos) para derivarte a la sucursal más cercana.",
        );
    }
    text
}

/// Numbered list of the fields that can be corrected
pub fn correction_menu(fields: &[Slot]) -> String {
    let mut text = String::from("¿Qué dato querés corregir?\n");
    for (i, slot) in fields.iter().enumerate() {
        text.push_str(&format!("{}) {}\n", i + 1, slot_label(*slot)));
    }
    text.push_str("Respondé con el número.");
    text
}

/// Client-facing closing message for a finalized case, followed by the menu
pub fn done(case: &Case) -> String {
    let mut text = format!("✅ ¡Listo! Ya tomé tus datos. Tu número de gestión es *{}*.\n", case.ticket);
    match &case.routing {
        Some(found) => {
            let nearby = match found.tier {
                Tier::ExactPostalCode | Tier::Zone | Tier::Geographic => "cercana",
                Tier::PostalDistance | Tier::Global => "sugerida",
            };
            text.push_str(&format!(
                "📍 Sucursal {nearby}: *{}* — {}.\n",
                found.provider.name, found.provider.address
            ));
        }
        None => text.push_str("Un asesor te va a confirmar la sucursal y los detalles.\n"),
    }
    text.push_str("Te conecto con un asesor para continuar.\n\n");
    text.push_str(MENU);
    text
}

/// Internal summary of a finalized case for the advisors
pub fn advisor_summary(case: &Case) -> String {
    let mut text = format!("Ticket: {}\nGestión: {}\n", case.ticket, case.flow.label());
    if let Some(role) = case.role {
        text.push_str(&format!("Rol: {}\n", role.label()));
    }
    if let Some(insurer) = &case.insurer {
        text.push_str(&format!("Aseguradora: {}\n", insurer.as_str()));
    }
    text.push_str(&format!("Marca/Modelo/Año: {}\n", case.vehicle()));
    if let Some(plate) = &case.plate {
        text.push_str(&format!("Patente: {plate}\n"));
    }
    if let Some(postal_code) = &case.postal_code {
        text.push_str(&format!("CP: {postal_code}\n"));
    }
    match &case.routing {
        Some(found) => text.push_str(&format!(
            "Sucursal: {} ({})\n",
            found.provider.name, found.provider.id
        )),
        None => text.push_str("Sucursal: sin asignar\n"),
    }
    text.push_str(&format!("Cliente: {}", display_client(&case.client_id)));
    text
}

pub fn price_inquiry_alert(client_id: &str, text: &str) -> String {
    format!(
        "Consulta de precios: \"{text}\" — Cliente: {}",
        display_client(client_id)
    )
}

pub fn handoff_alert(client_id: &str, stage: &str, text: &str) -> String {
    format!(
        "Pedido de asesor: \"{text}\" — Cliente: {} (etapa: {stage})",
        display_client(client_id)
    )
}

/// Channel address without the transport prefix
pub fn display_client(client_id: &str) -> &str {
    client_id.strip_prefix("whatsapp:").unwrap_or(client_id)
}
