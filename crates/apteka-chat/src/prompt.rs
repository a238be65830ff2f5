//! System instruction sent with every language-service request.

use crate::intent::{FIND_NEAREST_PHARMACIES, FIND_PHARMACIES, TRANSCRIBE_ONLY, TRANSCRIPTION_ARG};

/// Build the instruction. The nearby-search paragraph is included only when
/// that tool is on the menu.
pub fn system_instruction(has_coordinates: bool) -> String {
    let mut out = format!(
        "Ты русскоязычный голосовой помощник для поиска аптек.\n\
         \n\
         Ответы озвучиваются синтезатором речи. Отвечай одной или двумя короткими фразами \
         без списков, разметки, спецсимволов и переносов строк.\n\
         \n\
         1. Точно расшифруй аудиозапрос на русском. Числа пиши цифрами, города в именительном падеже. \
         Расшифровку всегда передавай в аргументе {transcription}.\n\
         2. Если пользователь называет аптеку или её признаки (название, номер, город, улицу, дом), \
         вызови {find}. Передавай только названные признаки, без слов «аптека», «номер», «город», «улица».\n",
        transcription = TRANSCRIPTION_ARG,
        find = FIND_PHARMACIES,
    );

    let mut step = 3;
    if has_coordinates {
        out.push_str(&format!(
            "{step}. Если пользователь спрашивает про аптеки рядом или поблизости, вызови {}.\n",
            FIND_NEAREST_PHARMACIES
        ));
        step += 1;
    }

    out.push_str(&format!(
        "{step}. Если запрос не про поиск аптеки, вызови {}.\n\
         \n\
         После результата поиска: если найдена одна аптека, назови её адрес. \
         Если кандидатов несколько, не перечисляй их все, а задай короткий уточняющий вопрос \
         про улицу, номер или город. Если ничего не найдено, попроси уточнить запрос.",
        TRANSCRIBE_ONLY
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_mentions_offered_tools() {
        let without = system_instruction(false);
        assert!(without.contains(FIND_PHARMACIES));
        assert!(without.contains(TRANSCRIBE_ONLY));
        assert!(!without.contains(FIND_NEAREST_PHARMACIES));

        assert!(without.contains("3. Если запрос не про поиск аптеки"));

        let with = system_instruction(true);
        assert!(with.contains(FIND_NEAREST_PHARMACIES));
        assert!(with.contains("4. Если запрос не про поиск аптеки"));
    }
}
